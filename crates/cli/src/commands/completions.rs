//! Shell completion generation

use clap::CommandFactory;
use clap_complete::Shell;

use super::Cli;
use crate::exit_code::ExitCode;

/// Arguments for the completions command
#[derive(clap::Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Write the completion script for `shell` into `out`
pub fn generate(shell: Shell, out: &mut dyn std::io::Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, out);
}

/// Print shell completions to stdout
pub fn execute(args: CompletionsArgs) -> ExitCode {
    generate(args.shell, &mut std::io::stdout());
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(shell: Shell) -> String {
        let mut buf = Vec::new();
        generate(shell, &mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_completions_bash() {
        let output = script(Shell::Bash);
        assert!(output.contains("osc"));
        assert!(output.contains("mount"));
    }

    #[test]
    fn test_completions_zsh() {
        assert!(script(Shell::Zsh).contains("compdef"));
    }

    #[test]
    fn test_completions_fish() {
        assert!(script(Shell::Fish).contains("complete -c osc"));
    }
}
