use std::io;

use webfilter::builtin::RENDER_PROCESS_ARG;

fn main() {
    let mut args = std::env::args();
    let _ = args.next();
    if let Some(a) = args.next() {
        if a == RENDER_PROCESS_ARG {
            // stdout carries the IPC stream; diagnostics go to stderr.
            let stdin = io::stdin();
            let stdout = io::stdout();
            if let Err(e) = webfilter::helper::run(stdin.lock(), stdout.lock()) {
                eprintln!("webfilter-helper: render process failed: {}", e);
                std::process::exit(1);
            }
            return;
        }
    }
    eprintln!(
        "webfilter-helper: run with {} to start a render process",
        RENDER_PROCESS_ARG
    );
    std::process::exit(2);
}
