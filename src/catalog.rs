#![forbid(unsafe_code)]

// Static reference data for virtual students: names, classes, code snippets.
// Every selection takes the random source as an argument so runs can be seeded.

use rand::seq::SliceRandom;
use rand::Rng;

pub const FIRST_NAMES: &[&str] = &[
    "Иван", "Петър", "Георги", "Мария", "Елена", "Николай", "Димитър", "Стефан",
    "Христо", "Калоян", "Виктория", "Александра", "Борислав", "Теодор", "Мартин",
];

pub const LAST_NAMES: &[&str] = &[
    "Иванов", "Петров", "Георгиев", "Димитров", "Николов", "Стефанов", "Тодоров",
    "Христов", "Костов", "Попов", "Василев", "Атанасов", "Митев", "Радев", "Йорданов",
];

pub const CLASSES: &[&str] = &["10А", "10Б", "11А", "11Б", "12А"];

pub const FILENAMES: &[&str] = &["main.js", "solution.js", "app.js", "index.js"];

/// Fixed roster of students registered on the exam server.
pub const ROSTER: &[(&str, &str)] = &[
    ("Петър Петров", "11А"),
    ("Мария Иванова", "11А"),
    ("Стефан Георгиев", "11А"),
    ("Анна Димитрова", "11А"),
    ("Николай Стоянов", "11А"),
    ("Иван Иванов", "11Б"),
    ("Георги Стоянов", "11Б"),
    ("Елена Петкова", "11Б"),
    ("Димитър Николов", "11Б"),
    ("Йорданка Христова", "11Б"),
    ("Стефан Николов", "12А"),
    ("Мариана Тодорова", "12А"),
    ("Владимир Иванов", "12А"),
    ("Росица Георгиева", "12А"),
    ("Елена Стоянова", "12Б"),
];

pub const CODE_SNIPPETS: &[&str] = &[
    "function add(a, b) {
    return a + b;
}

console.log(add(5, 3));",
    "const numbers = [1, 2, 3, 4, 5];
const doubled = numbers.map(n => n * 2);
console.log(doubled);",
    "class Calculator {
    add(a, b) { return a + b; }
    subtract(a, b) { return a - b; }
    multiply(a, b) { return a * b; }
}",
    "async function fetchData(url) {
    const response = await fetch(url);
    const data = await response.json();
    return data;
}",
    "const fibonacci = (n) => {
    if (n <= 1) return n;
    return fibonacci(n - 1) + fibonacci(n - 2);
};",
    "function isPrime(num) {
    if (num < 2) return false;
    for (let i = 2; i <= Math.sqrt(num); i++) {
        if (num % i === 0) return false;
    }
    return true;
}",
    "const sortArray = (arr) => {
    return [...arr].sort((a, b) => a - b);
};

console.log(sortArray([5, 2, 8, 1, 9]));",
    "function reverseString(str) {
    return str.split('').reverse().join('');
}

console.log(reverseString(\"hello\"));",
];

/// Display name and class label of one virtual student
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub class: String,
}

/// Draws "<first> <last>" and a class independently from the catalog.
pub fn random_identity<R: Rng + ?Sized>(rng: &mut R) -> Identity {
    let first = pick(FIRST_NAMES, rng);
    let last = pick(LAST_NAMES, rng);
    Identity {
        name: format!("{first} {last}"),
        class: pick(CLASSES, rng).to_string(),
    }
}

/// Roster entry for the given index, wrapping around the roster length.
pub fn roster_identity(index: usize) -> Identity {
    let (name, class) = ROSTER[index % ROSTER.len()];
    Identity {
        name: name.to_string(),
        class: class.to_string(),
    }
}

pub fn random_snippet<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    pick(CODE_SNIPPETS, rng)
}

pub fn random_filename<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    pick(FILENAMES, rng)
}

fn pick<R: Rng + ?Sized>(table: &'static [&'static str], rng: &mut R) -> &'static str {
    table.choose(rng).copied().unwrap_or_default()
}
