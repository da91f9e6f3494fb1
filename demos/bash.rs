//! Drive an interactive bash: print whatever it writes for five seconds
//! while a couple of commands are sent to it.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use iexec::{InteractiveProcess, Reader};

struct Printer;

impl Reader for Printer {
    fn on_data(&mut self, data: &[u8]) -> bool {
        let _ = io::stdout().write_all(data);
        let _ = io::stdout().flush();
        false
    }

    fn on_error(&mut self, data: &[u8]) -> bool {
        let _ = io::stdout().write_all(data);
        let _ = io::stdout().flush();
        false
    }

    fn on_timeout(&mut self) {}
}

fn main() -> iexec::Result<()> {
    let process = Arc::new(InteractiveProcess::launch("bash", ["-i"])?);

    let receiver = {
        let process = Arc::clone(&process);
        thread::spawn(move || process.receive(Some(&mut Printer), Duration::from_secs(5)))
    };

    process.send("echo hello world\n")?;
    thread::sleep(Duration::from_secs(1));
    process.send("ls\n")?;
    thread::sleep(Duration::from_secs(1));

    process.cancel();
    let _ = receiver.join();
    process.shutdown()?;
    Ok(())
}
