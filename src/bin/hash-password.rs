//! Prints a bcrypt hash for the `ADMIN_PASSWORD_HASH` environment variable.

use bcrypt::{hash, verify, DEFAULT_COST};
use std::env;

use deviem_site::config::DEFAULT_ADMIN_PASSWORD;

fn main() {
    let password = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: cargo run --bin hash-password <PASSWORD>");
        std::process::exit(1);
    });

    if password == DEFAULT_ADMIN_PASSWORD {
        eprintln!("Warning: this is the built-in default password. Pick a new one for production.");
    }

    let hashed = match hash(&password, DEFAULT_COST) {
        Ok(hashed) => hashed,
        Err(e) => {
            eprintln!("Error hashing password: {}", e);
            std::process::exit(1);
        }
    };

    // Verify before printing
    if !verify(&password, &hashed).unwrap_or(false) {
        eprintln!("Error: generated hash did not verify");
        std::process::exit(1);
    }

    println!("\nCost     : {}", DEFAULT_COST);
    println!("Hash     : {}\n", hashed);
    println!("# Paste this into your .env (and remove ADMIN_PASSWORD):");
    println!("ADMIN_PASSWORD_HASH={}", hashed);
}
