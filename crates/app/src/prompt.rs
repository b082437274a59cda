use std::io::{self, BufRead, Write};
use ynamazon_core::{OtpPrompt, SourceError};

use crate::pipeline::Confirmer;

/// Asks on the terminal for the code from the authenticator app or SMS.
pub struct ConsoleOtp;

impl OtpPrompt for ConsoleOtp {
    fn one_time_password(&self) -> Result<String, SourceError> {
        let code = ask("Enter the Amazon one-time password: ")
            .map_err(|e| SourceError::Authentication(format!("could not read one-time password: {e}")))?;
        if code.is_empty() {
            return Err(SourceError::Authentication("no one-time password entered".to_string()));
        }
        Ok(code)
    }
}

/// Yes/no questions on the terminal; anything unreadable counts as "no".
pub struct ConsoleConfirmer;

impl Confirmer for ConsoleConfirmer {
    fn confirm(&self, question: &str) -> bool {
        loop {
            match ask(&format!("{question} [y/n]: ")) {
                Ok(answer) => match parse_yes_no(&answer) {
                    Some(yes) => return yes,
                    None => continue,
                },
                Err(e) => {
                    tracing::warn!("Could not read answer: {e}");
                    return false;
                }
            }
        }
    }

    fn choose(&self, question: &str, options: &[String]) -> Option<usize> {
        eprintln!("{question}");
        for (n, option) in options.iter().enumerate() {
            eprintln!("  {}. {option}", n + 1);
        }
        loop {
            match ask(&format!("Choice [1-{}, Enter for 1]: ", options.len())) {
                Ok(answer) => match parse_choice(&answer, options.len()) {
                    Some(choice) => return choice,
                    None => continue,
                },
                Err(e) => {
                    tracing::warn!("Could not read answer: {e}");
                    return None;
                }
            }
        }
    }
}

fn ask(prompt: &str) -> io::Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;
    read_answer(&mut io::stdin().lock())
}

fn read_answer(reader: &mut impl BufRead) -> io::Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"));
    }
    Ok(line.trim().to_string())
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// `Some(None)` for an empty answer, `Some(Some(index))` for a listed number.
fn parse_choice(answer: &str, count: usize) -> Option<Option<usize>> {
    if answer.is_empty() {
        return Some(None);
    }
    match answer.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(Some(n - 1)),
        _ => None,
    }
}
