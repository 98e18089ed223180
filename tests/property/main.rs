// tests/property/main.rs

mod admission;
