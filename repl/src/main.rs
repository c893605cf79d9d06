use anyhow::Result;
use pebble::{InterpretResult, VirtualMachine};
use rustyline::{error::ReadlineError, Editor};

fn main() -> Result<()> {
    println!(
        r"
Welcome to the pebble REPL!
You may type pebble code below for evaluation.
Enter 'exit' or press 'CTRL+C' to exit the REPL.
    "
    );

    let mut rl = Editor::<()>::new();
    if rl.load_history("history.txt").is_err() {
        println!("No previous history.");
    }

    // Each line re-runs everything accepted so far on a fresh machine, so only
    // output past `printed` is new.
    let mut accumulated_code = String::new();
    let mut printed = 0;

    loop {
        let readline = rl.readline("> ");
        match readline {
            Ok(line) => match line.as_ref() {
                "exit" => break,
                line => {
                    rl.add_history_entry(line);

                    let test_code = format!("{}\n{}", accumulated_code, line);

                    let mut vm = VirtualMachine::default();
                    let interpretation = vm.interpret(&test_code);

                    for value in interpretation.output.iter().skip(printed) {
                        println!("{}", value);
                    }

                    match (interpretation.result, &interpretation.error) {
                        (InterpretResult::Ok, _) => {
                            accumulated_code = test_code;
                            printed = interpretation.output.len();
                        }
                        (InterpretResult::CompileError, Some(error)) => {
                            eprintln!("Error compiling: {}", error);
                        }
                        (_, Some(error)) => {
                            eprintln!("Error running: {}", error);
                        }
                        (_, None) => {}
                    }
                }
            },
            Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history("history.txt")?;
    Ok(())
}
