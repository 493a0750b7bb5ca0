use cm_core::config::Config;
use cm_session::log_line::LogLine;
use cm_session::{CommandSpec, LineEvent, OutputStream};

/// Run the `tail` subcommand until the process ends or Ctrl-C is pressed.
pub async fn run(config: &Config, executable: String, args: Vec<String>, timestamps: bool) -> anyhow::Result<i32> {
    let spec = CommandSpec::new(executable).args(args);
    let runner = super::runner(config);
    let mut stream = runner.tail(spec);

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            next = stream.next_line() => {
                let Some(event) = next else { break };
                print_event(&event, timestamps);
            }
            _ = &mut interrupt => {
                tracing::info!("interrupted, stopping tail");
                stream.cancel();
                return Ok(130);
            }
        }
    }

    if let Some(failure) = stream.failure() {
        eprintln!("{failure}");
        return Ok(1);
    }
    Ok(0)
}

fn print_event(event: &LineEvent, timestamps: bool) {
    let text = if timestamps {
        let line = LogLine::from(event);
        if line.timestamp.is_empty() {
            line.content
        } else {
            format!("[{}] {}", line.timestamp, line.content)
        }
    } else {
        event.line.clone()
    };
    match event.stream {
        OutputStream::Stdout => println!("{text}"),
        OutputStream::Stderr => eprintln!("{text}"),
    }
}
