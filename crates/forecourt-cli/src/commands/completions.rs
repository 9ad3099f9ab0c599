use std::io::{self, Write};
use std::path::Path;

use clap::CommandFactory;
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

pub fn render_completions(shell: CompletionShell) -> Vec<u8> {
    let mut command = Cli::command();
    let bin_name = command.get_name().to_string();
    let mut buffer = Vec::new();
    match shell {
        CompletionShell::Bash => emit(shells::Bash, &mut command, &bin_name, &mut buffer),
        CompletionShell::Zsh => emit(shells::Zsh, &mut command, &bin_name, &mut buffer),
        CompletionShell::Fish => emit(shells::Fish, &mut command, &bin_name, &mut buffer),
        CompletionShell::PowerShell => {
            emit(shells::PowerShell, &mut command, &bin_name, &mut buffer);
        }
    }
    buffer
}

pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let script = render_completions(shell);
    if let Some(path) = output_path {
        std::fs::write(path, &script)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&script)?;
    }
    Ok(())
}

fn emit<G: Generator>(generator: G, command: &mut clap::Command, bin_name: &str, buffer: &mut Vec<u8>) {
    generate(generator, command, bin_name, buffer);
}
