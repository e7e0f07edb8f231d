//! Interactive live view: redraws on every change, takes commands on stdin.

use std::future::pending;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use apc_client::{AgentView, CommandOutcome, LinkState};
use apc_core::SessionOverrides;

use crate::render;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Start,
    Stop,
    Refresh,
    Quit,
    Help,
    Unknown,
}

fn parse_input(line: &str) -> Option<Input> {
    let word = line.trim().to_ascii_lowercase();
    let input = match word.as_str() {
        "" => return None,
        "start" | "s" => Input::Start,
        "stop" | "x" => Input::Stop,
        "refresh" | "r" => Input::Refresh,
        "quit" | "q" | "exit" => Input::Quit,
        "help" | "?" => Input::Help,
        _ => Input::Unknown,
    };
    Some(input)
}

const HELP: &str = "commands: start | stop | refresh | quit";

/// Resolves when the link state changes; never if there is no link yet.
async fn link_changed(link: &mut Option<watch::Receiver<LinkState>>) -> bool {
    match link {
        Some(rx) => rx.changed().await.is_ok(),
        None => pending().await,
    }
}

fn draw(view: &AgentView, link: Option<&watch::Receiver<LinkState>>) {
    let state = link.map(|rx| *rx.borrow());
    println!("{}", render::panel(&view.view(), state));
}

fn report(outcome: CommandOutcome) {
    match outcome {
        CommandOutcome::Completed(ack) => tracing::info!(ack = %ack.status, "Agent acknowledged"),
        // Already on the panel.
        CommandOutcome::Failed(_) => {},
        CommandOutcome::Skipped => println!("busy, command ignored"),
    }
}

pub async fn run(view: AgentView) -> anyhow::Result<()> {
    let mut changes = view.watch();
    let mut link: Option<watch::Receiver<LinkState>> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let mounting = view.clone();
    tokio::spawn(async move { mounting.mount().await });
    println!("{HELP}");

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                changes.borrow_and_update();
                if link.is_none() {
                    link = view.link();
                }
                draw(&view, link.as_ref());
            },
            open = link_changed(&mut link) => {
                if !open {
                    link = None;
                }
                draw(&view, link.as_ref());
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let Some(input) = parse_input(&line) else {
                    continue;
                };
                if matches!(input, Input::Start | Input::Stop | Input::Refresh) && view.view().busy {
                    println!("busy, command ignored");
                    continue;
                }
                let v = view.clone();
                match input {
                    Input::Start => {
                        tokio::spawn(async move { report(v.start(SessionOverrides::default()).await) });
                    },
                    Input::Stop => {
                        tokio::spawn(async move { report(v.stop().await) });
                    },
                    Input::Refresh => {
                        tokio::spawn(async move { v.refresh().await });
                    },
                    Input::Quit => break,
                    Input::Help => println!("{HELP}"),
                    Input::Unknown => println!("unknown command; {HELP}"),
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    view.unmount();
    Ok(())
}
