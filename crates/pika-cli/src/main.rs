use std::{
    env,
    io::{self, BufRead as _, Write as _},
    process::ExitCode,
};

use pika::{Config, Engine, PikaError, ReplOutcome, ReplSession};

const USAGE: &str = "usage: pika [--debug] [script]";

fn main() -> ExitCode {
    let mut debug = false;
    let mut script: Option<String> = None;

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--debug" => debug = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                return ExitCode::SUCCESS;
            }
            other if other.starts_with('-') => {
                eprintln!("error: unknown option '{other}'\n{USAGE}");
                return ExitCode::from(64);
            }
            other => {
                if script.is_some() {
                    eprintln!("error: more than one script given\n{USAGE}");
                    return ExitCode::from(64);
                }
                script = Some(other.to_owned());
            }
        }
    }

    let config = Config {
        debug,
        ..Config::default()
    };
    match script {
        Some(path) => run_script(config, &path),
        None => repl(config),
    }
}

fn run_script(config: Config, path: &str) -> ExitCode {
    let mut engine = Engine::with_config(config);
    match engine.run_file(path) {
        Ok(()) => ExitCode::SUCCESS,
        // Diagnostics and tracebacks were already written by the error sink.
        Err(PikaError::Compile(_)) => ExitCode::from(65),
        Err(PikaError::Runtime { .. }) => ExitCode::from(70),
        Err(PikaError::Io(message)) => {
            eprintln!("error: {message}");
            ExitCode::from(66)
        }
    }
}

fn repl(config: Config) -> ExitCode {
    let mut session = ReplSession::with_config(config);
    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { ">>> " } else { "... " };
        print!("{prompt}");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return ExitCode::SUCCESS,
            Ok(_) => {}
            Err(err) => {
                eprintln!("error: cannot read input: {err}");
                return ExitCode::FAILURE;
            }
        }
        buffer.push_str(&line);

        match session.execute(&buffer) {
            Ok(ReplOutcome::Done) => buffer.clear(),
            Ok(ReplOutcome::NeedMore) => {}
            // Both compile and runtime failures were already reported by the
            // session's error sink; drop the buffer and keep going.
            Err(_) => buffer.clear(),
        }
    }
}
