//! Producer-side runtime: the code that runs inside the devcard subprocess.
//!
//! A generated bootstrap binary calls [`run`] with its dispatch table. The
//! runtime parses the command line (`<fork-dir> <transient-dir>
//! <devcard-name> <tcp-address>`), connects to the supervising runner, drives
//! the named producer, and exits. Producer panics are captured and reported
//! as ordinary cells, so a crash shows up in the browser instead of killing
//! the page.

use crate::devcard::{Devcard, DevcardProducer, Output};
use crate::message;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

/// Entry point for generated bootstrap binaries.
///
/// Looks up the requested devcard in `producers`, produces it, and exits the
/// process. Exit code 0 on success (including a captured producer panic),
/// 2 on a usage or connection error.
pub fn run(producers: &[(&str, DevcardProducer)]) -> ! {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 5 {
        eprintln!("usage: {} <fork-dir> <transient-dir> <devcard-name> <tcp-address>", args[0]);
        process::exit(2);
    }
    let (transient_dir, name, address) = (&args[2], &args[3], &args[4]);

    let Some((_, producer)) = producers.iter().find(|(n, _)| n == name) else {
        eprintln!("no such devcard: {name}");
        process::exit(2);
    };

    match produce(address, Path::new(transient_dir), *producer) {
        Ok(()) => process::exit(0),
        Err(err) => {
            eprintln!("{err}");
            process::exit(2);
        }
    }
}

/// Produce one devcard, streaming frames to `address`.
///
/// An empty address selects echo mode: frames are printed to stdout. This is
/// a single-writer debugging convenience, not the normal path.
pub fn produce(address: &str, temp_dir: &Path, producer: DevcardProducer) -> std::io::Result<()> {
    let (out, control) = if address.is_empty() {
        (Output::Echo, None)
    } else {
        let stream = TcpStream::connect(address)?;
        let reader = stream.try_clone()?;
        let (unblock_tx, unblock_rx) = mpsc::channel();
        spawn_control_reader(reader, unblock_tx);
        (Output::Tcp(Arc::new(Mutex::new(stream))), Some(unblock_rx))
    };

    let mut card = Devcard::new("Untitled devcard", temp_dir, out, control);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| producer(&mut card)));
    if let Err(payload) = outcome {
        report_panic(&mut card, payload.as_ref());
    }
    Ok(())
}

/// Reads control lines from the runner. `exit` terminates the process;
/// `unblock <id>` releases the matching wait cell.
fn spawn_control_reader(stream: TcpStream, unblock_tx: mpsc::Sender<String>) {
    std::thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => return,
            };
            match message::parse_control(&line) {
                Some(message::Control::Exit) => process::exit(0),
                Some(message::Control::Unblock(id)) => {
                    let _ = unblock_tx.send(id);
                }
                None => eprintln!("malformed control line: {line:?}"),
            }
        }
    });
}

fn report_panic(card: &mut Devcard, payload: &(dyn std::any::Any + Send)) {
    let text = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };

    card.jump();
    card.error("Panic!", text);
    card.mono(std::backtrace::Backtrace::force_capture().to_string());
}
