//! Terminal chat client.
//!
//! Two activities share one view: the network task (see [`network`]) and the
//! render loop (see [`ui`]). Only the render loop touches [`view::ChatView`];
//! the network task hands it events over a channel that is drained once per
//! tick, which keeps updates ordered without locking.

pub mod command;
pub mod network;
pub mod ui;
pub mod view;

use anyhow::{Context, Result};

use crate::cli::ClientArgs;

pub async fn run(args: ClientArgs) -> Result<()> {
    let network::Connection { requests, events } = network::spawn(args.server);

    tokio::task::spawn_blocking(move || ui::run(requests, events))
        .await
        .context("chat view thread panicked")?
}
