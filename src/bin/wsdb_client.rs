// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Interactive record database client.
//
// Usage: wsdb_client   (settings come from WSDB_* environment variables)
//
// Menu: 1 create, 2 display, 3 modify, 4 server log, 5 local clients,
// -1 quit. Ctrl-C disconnects cleanly from anywhere in the menu, including
// while a prompt is waiting for input.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use chrono::{DateTime, Local};
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use wsdb::{ClientConfig, ClientEntry, Error, Record, Session, FIELD_NAMES, RECORD_FIELDS};

type Shared = Arc<Mutex<Option<Session>>>;

fn lock(shared: &Shared) -> MutexGuard<'_, Option<Session>> {
    shared.lock().unwrap_or_else(|p| p.into_inner())
}

/// Run `f` on the live session. The guard is held only for the call, so
/// the signal thread can take the session while a prompt waits for input.
fn with_session<T>(
    shared: &Shared,
    f: impl FnOnce(&mut Session) -> wsdb::Result<T>,
) -> wsdb::Result<T> {
    match lock(shared).as_mut() {
        Some(session) => f(session),
        None => Err(Error::ConnectionClosed),
    }
}

/// Print `prompt` and read one integer. `None` on end of input.
fn read_i32(input: &mut impl BufRead, prompt: &str) -> Option<i32> {
    loop {
        print!("{prompt}");
        io::stdout().flush().ok();
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        match line.trim().parse() {
            Ok(v) => return Some(v),
            Err(_) => println!("Please enter a whole number."),
        }
    }
}

fn clock(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_records(first: i32, records: &[Record]) {
    print!("{:>6}", "#");
    for name in FIELD_NAMES {
        print!(" {name:>9}");
    }
    println!();
    for (i, r) in records.iter().enumerate() {
        print!("{:>6}", first + i as i32);
        for v in r.fields() {
            print!(" {v:>9}");
        }
        println!();
    }
}

fn print_clients(entries: &[ClientEntry]) {
    println!(
        "{:>4} {:>8} {:>8}  {:<19}  {:<19}",
        "Slot", "Commands", "PID", "Started", "Last active"
    );
    for e in entries {
        println!(
            "{:>4} {:>8} {:>8}  {:<19}  {:<19}",
            e.slot,
            e.commands,
            e.pid,
            clock(e.connected_at),
            clock(e.last_active_at)
        );
    }
}

// ---------------------------------------------------------------------------
// Menu items
// ---------------------------------------------------------------------------

fn create(shared: &Shared, input: &mut impl BufRead) -> wsdb::Result<()> {
    let mut fields = [0i32; RECORD_FIELDS];
    for (v, name) in fields.iter_mut().zip(FIELD_NAMES) {
        match read_i32(input, &format!("{name}: ")) {
            Some(n) => *v = n,
            None => return Ok(()),
        }
    }
    let (echo, count) = with_session(shared, |s| {
        let echo = s.create(&Record::new(fields))?;
        Ok((echo, s.count()?))
    })?;
    println!("Record created.");
    print_records(count as i32, &[echo]);
    Ok(())
}

fn display(shared: &Shared, input: &mut impl BufRead) -> wsdb::Result<()> {
    let count = with_session(shared, |s| s.count())?;
    if count == 0 {
        println!("The database is empty.");
        return Ok(());
    }
    let Some(ordinal) = read_i32(input, &format!("Record number (1-{count}, 0 for all): ")) else {
        return Ok(());
    };
    if ordinal == 0 {
        let records = with_session(shared, |s| s.display_all())?;
        print_records(1, &records);
    } else {
        let record = with_session(shared, |s| s.display(ordinal))?;
        print_records(ordinal, &[record]);
    }
    Ok(())
}

fn modify(shared: &Shared, input: &mut impl BufRead) -> wsdb::Result<()> {
    let count = with_session(shared, |s| s.count())?;
    if count == 0 {
        println!("The database is empty.");
        return Ok(());
    }
    let Some(ordinal) = read_i32(input, &format!("Record number (1-{count}): ")) else {
        return Ok(());
    };
    let current = with_session(shared, |s| s.display(ordinal))?;
    print_records(ordinal, &[current]);
    for (i, name) in FIELD_NAMES.iter().enumerate() {
        println!("  {}. {name}", i + 1);
    }
    let Some(field) = read_i32(input, "Field to change: ") else {
        return Ok(());
    };
    let Some(value) = read_i32(input, "New value: ") else {
        return Ok(());
    };
    let index = match usize::try_from(field - 1) {
        Ok(i) if i < RECORD_FIELDS => i,
        _ => {
            println!("There is no field {field}.");
            return Ok(());
        }
    };
    let changed = current.with_field(index, value)?;
    let updated = with_session(shared, |s| s.replace(ordinal, &changed))?;
    println!("Record modified.");
    print_records(ordinal, &[updated]);
    Ok(())
}

fn show_log(shared: &Shared) -> wsdb::Result<()> {
    for line in with_session(shared, |s| s.show_log())? {
        println!("{line}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn menu(shared: &Shared, input: &mut impl BufRead) -> wsdb::Result<()> {
    loop {
        println!();
        println!("1. Create record");
        println!("2. Display record(s)");
        println!("3. Modify record");
        println!("4. Show server log");
        println!("5. Show local clients");
        println!("-1. Quit");
        let Some(choice) = read_i32(input, "> ") else {
            return Ok(());
        };
        if choice == -1 {
            return Ok(());
        }

        let result = match choice {
            1 => create(shared, input),
            2 => display(shared, input),
            3 => modify(shared, input),
            4 => show_log(shared),
            5 => with_session(shared, |s| s.clients()).map(|c| print_clients(&c)),
            _ => {
                println!("Unknown choice.");
                Ok(())
            }
        };
        match result {
            Ok(()) => {}
            // Interrupted: the signal thread already disconnected.
            Err(Error::ConnectionClosed) if lock(shared).is_none() => return Ok(()),
            Err(e) if e.is_transport() => return Err(e),
            Err(e @ Error::LockSetRemoved { .. }) => return Err(e),
            Err(e) => println!("{e}"),
        }
    }
}

fn disconnect(shared: &Shared) {
    if let Some(session) = lock(shared).take() {
        if let Err(e) = session.disconnect() {
            warn!(error = %e, "disconnect failed");
        }
    }
}

fn run() -> wsdb::Result<()> {
    let config = ClientConfig::from_env()?;
    let session = Session::connect(&config)?;
    println!(
        "Connected to {}:{} (client slot {}).",
        config.server_addr,
        config.port,
        session.registry().slot()
    );
    let shared: Shared = Arc::new(Mutex::new(Some(session)));

    let mut signals = Signals::new([SIGINT])?;
    let on_signal = Arc::clone(&shared);
    thread::Builder::new()
        .name("wsdb-signals".to_string())
        .spawn(move || {
            if signals.forever().next().is_some() {
                println!();
                disconnect(&on_signal);
                std::process::exit(0);
            }
        })?;

    let outcome = menu(&shared, &mut io::stdin().lock());
    disconnect(&shared);
    outcome
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "client failed");
            eprintln!("wsdb_client: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Cursor, Read};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    use wsdb::proto::ServerState;
    use wsdb::shm_name::{lock_set_name, registry_name};
    use wsdb::{
        ClientLock, ClientRegistry, LockSet, OpLog, SharedSegment, ShutdownKind, Supervisor,
        LOCKS_PER_SET,
    };

    /// Scripted stdin that counts every read made while the session is locked.
    struct Keyboard {
        script: Cursor<Vec<u8>>,
        shared: Shared,
        reads_under_lock: usize,
    }

    impl Read for Keyboard {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.script.read(buf)
        }
    }

    impl BufRead for Keyboard {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            if self.shared.try_lock().is_err() {
                self.reads_under_lock += 1;
            }
            self.script.fill_buf()
        }

        fn consume(&mut self, amt: usize) {
            self.script.consume(amt)
        }
    }

    #[test]
    fn prompts_never_wait_under_the_session_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tag = format!("wsdb_menu_{}", std::process::id());

        let server_locks = format!("{tag}_ser");
        LockSet::clear_storage(&server_locks);
        let locks = Arc::new(LockSet::open(&server_locks, LOCKS_PER_SET).expect("lock set"));
        let state = ServerState::open(
            dir.path().join("wsdb.bin"),
            dir.path().join("log.ser"),
            locks,
        )
        .expect("server state");
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let supervisor = Supervisor::from_parts(listener, Arc::new(state)).expect("supervisor");
        let addr = supervisor.local_addr();
        let shutdown = supervisor.shutdown_handle();
        let server = thread::spawn(move || supervisor.run(|| true));

        let key = format!("{tag}_cli");
        LockSet::clear_storage(&lock_set_name(&key));
        SharedSegment::<u64>::unlink_by_name(&registry_name(&key));
        let registry = ClientRegistry::attach_as(&key, 4242).expect("attach");
        let log = OpLog::open(
            dir.path().join("log.cli"),
            Arc::clone(registry.locks()),
            ClientLock::LogWrite,
        )
        .expect("client log");
        let stream = TcpStream::connect(addr).expect("connect");
        let session = Session::start(stream, 4242, registry, log).expect("session");
        let shared: Shared = Arc::new(Mutex::new(Some(session)));

        // Create, display it, change field 2 to 42, list clients, quit.
        let script = "1\n2018\n1\n2\n3\n4\n5\n6\n7\n8\n2\n1\n3\n1\n2\n42\n5\n-1\n";
        let mut keys = Keyboard {
            script: Cursor::new(script.as_bytes().to_vec()),
            shared: Arc::clone(&shared),
            reads_under_lock: 0,
        };
        menu(&shared, &mut keys).expect("menu");
        assert_eq!(keys.reads_under_lock, 0);

        let stored = with_session(&shared, |s| s.display(1)).expect("display");
        assert_eq!(stored.fields(), &[2018, 42, 2, 3, 4, 5, 6, 7, 8]);

        disconnect(&shared);
        assert!(lock(&shared).is_none());
        for _ in 0..200 {
            if server.is_finished() {
                break;
            }
            shutdown.request(ShutdownKind::Terminate);
            thread::sleep(Duration::from_millis(25));
        }
        server.join().expect("supervisor thread").expect("server run");
    }
}
