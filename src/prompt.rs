// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Line-by-line questions for interactive use.
 *
 * A `Prompter` reads answers from any `BufRead` and writes questions to any
 * `Write`, so it can be driven by a terminal or by a test. An empty answer
 * takes the default, where there is one. Running out of input is an error,
 * rather than an endless loop of re-asking.
 */

use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<io::BufReader<io::Stdin>, io::Stdout> {
    pub fn stdio() -> Self {
        Prompter::new(io::BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Print something that isn't a question.
    pub fn say<D: Display>(&mut self, msg: D) -> io::Result<()> {
        writeln!(self.output, "{}", msg)
    }

    fn ask(&mut self, question: &str, default: Option<&str>) -> io::Result<String> {
        match default {
            Some(d) => write!(self.output, "{} [{}]: ", question, d)?,
            None => write!(self.output, "{}: ", question)?,
        }
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no more input"));
        }
        Ok(line.trim().to_string())
    }

    /// Free text. Without a default, an empty answer is returned as-is.
    pub fn input(&mut self, question: &str, default: Option<&str>) -> io::Result<String> {
        let answer = self.ask(question, default)?;
        Ok(match (answer.is_empty(), default) {
            (true, Some(d)) => d.to_string(),
            _ => answer,
        })
    }

    /// Anything starting with `y` is yes; anything else non-empty is no.
    pub fn yes_no(&mut self, question: &str, default: bool) -> io::Result<bool> {
        let answer = self.ask(question, Some(if default { "y" } else { "n" }))?;
        if answer.is_empty() {
            return Ok(default);
        }
        Ok(answer.to_lowercase().starts_with('y'))
    }

    /// One of `choices`; asks again until it gets one.
    pub fn choice(&mut self, question: &str, choices: &[&str], default: Option<&str>) -> io::Result<String> {
        let question = format!("{} ({})", question, choices.join("/"));
        loop {
            let answer = self.input(&question, default)?;
            if choices.contains(&answer.as_str()) {
                return Ok(answer);
            }
            writeln!(self.output, "Please choose one of: {}", choices.join(", "))?;
        }
    }

    /// A number within the optional bounds; asks again until it gets one.
    pub fn number<T>(&mut self, question: &str, default: Option<T>, min: Option<T>, max: Option<T>) -> io::Result<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
    {
        let default_str = default.map(|d| d.to_string());
        loop {
            let answer = self.ask(question, default_str.as_deref())?;
            let value = match (answer.is_empty(), default) {
                (true, Some(d)) => d,
                _ => match answer.parse::<T>() {
                    Ok(v) => v,
                    Err(_) => {
                        writeln!(self.output, "Invalid input: '{}' is not a number", answer)?;
                        continue;
                    }
                },
            };
            if let Some(min) = min {
                if value < min {
                    writeln!(self.output, "Invalid input: must be >= {}", min)?;
                    continue;
                }
            }
            if let Some(max) = max {
                if value > max {
                    writeln!(self.output, "Invalid input: must be <= {}", max)?;
                    continue;
                }
            }
            return Ok(value);
        }
    }

    pub fn int(&mut self, question: &str, default: Option<i64>, min: Option<i64>, max: Option<i64>) -> io::Result<i64> {
        self.number(question, default, min, max)
    }

    pub fn float(&mut self, question: &str, default: Option<f64>, min: Option<f64>, max: Option<f64>) -> io::Result<f64> {
        self.number(question, default, min, max)
    }
}
