use std::sync::Arc;

use clap::Parser;
use ralphex_core::CancelToken;

use ralphex::interrupt::{install_signal_handler, start_interrupt_watcher, CleanupSlot};
use ralphex::{lifecycle, Cli};

fn main() {
    let cli = Cli::parse();
    println!("ralphex {}", env!("CARGO_PKG_VERSION"));

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);

    // populated once a worktree exists; the watcher's force-exit path drains
    // it so teardown happens even when graceful shutdown stalls
    let wt_cleanup = Arc::new(CleanupSlot::new());
    let watcher = start_interrupt_watcher(cancel.clone(), wt_cleanup.clone());

    let result = lifecycle::run(cli, cancel, wt_cleanup);
    drop(watcher);

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
