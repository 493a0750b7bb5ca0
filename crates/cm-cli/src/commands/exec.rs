use cm_core::config::Config;
use cm_session::CommandSpec;

/// Run the `exec` subcommand. Returns the process exit status for `main`.
pub async fn run(
    config: &Config,
    executable: String,
    args: Vec<String>,
    timeout: Option<u64>,
    json_output: bool,
) -> anyhow::Result<i32> {
    let timeout = timeout.unwrap_or(config.process.default_timeout_secs);
    if timeout == 0 {
        anyhow::bail!("--timeout must be at least 1 second");
    }
    let spec = CommandSpec::new(executable).args(args).timeout_secs(timeout);

    let runner = super::runner(config);
    let result = runner.execute(&spec).await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        if result.is_timeout() || result.exit_code == -1 {
            eprintln!();
        }
    }

    // -1 is not a valid process status; report it as a generic failure.
    Ok(if result.exit_code < 0 { 1 } else { result.exit_code })
}
