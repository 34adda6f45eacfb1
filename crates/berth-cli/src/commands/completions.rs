use super::EXIT_SUCCESS;
use clap::CommandFactory;
use clap_complete::Shell;
use std::io::Write;

#[allow(clippy::unnecessary_wraps)]
pub fn run<C: CommandFactory>(shell: Shell) -> Result<u8, String> {
    write_completions::<C>(shell, &mut std::io::stdout());
    Ok(EXIT_SUCCESS)
}

fn write_completions<C: CommandFactory>(shell: Shell, out: &mut dyn Write) {
    let mut command = C::command();
    let bin = command.get_name().to_owned();
    clap_complete::generate(shell, &mut command, bin, out);
}
