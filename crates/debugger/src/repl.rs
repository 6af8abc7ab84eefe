//! Interactive prompt

use fiberdbg::{commands, DebugTarget, Session};
use std::io::{self, BufRead, Write};

/// Run the REPL
pub fn run<T: DebugTarget>(session: &mut Session<T>) {
    println!("fiberdbg");
    println!("Type 'quit' to exit.");
    println!();

    match session.layout() {
        Ok(layout) => println!("Fiber runtime found: {} fibers per core.", layout.max_fibers_per_core),
        Err(e) => println!("Warning: {}", e),
    }
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("(fiberdbg) ");
        if let Err(e) = stdout.flush() {
            eprintln!("Error writing prompt: {}", e);
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }

        let cmd = commands::parse(&line);
        match session.execute(cmd) {
            Ok(true) => break, // Quit
            Ok(false) => {}
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    println!("Goodbye.");
}
