//! Two-process crash-recovery test.
//!
//! A child process acquires the transport lock, allocates and fills a frame,
//! then dies via `_exit` without committing or unlocking. The kernel's
//! robust-list cleanup releases the in-arena mutex with the owner-died flag;
//! the parent's next lock must observe the rollback: no trace of the aborted
//! frame, and the transport fully usable afterwards.
//!
//! Uses the self-spawning pattern: the test executable re-invokes itself
//! with an environment variable selecting the child role.

use std::env;
use std::io::Write;
use std::process::{Command, Stdio};

use basalt_arena::{ArenaFile, FileOptions, remove};
use basalt_transport::Transport;

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "BASALT_CRASH_ROLE";
const ENV_PATH: &str = "BASALT_CRASH_PATH";
const ROLE_CRASHER: &str = "crasher";

fn open_transport(path: &str) -> Transport {
    let opts = FileOptions { size: 4096, ..FileOptions::default() };
    let file = ArenaFile::open(path, &opts).expect("failed to open arena file");
    Transport::new(file.into_arena()).expect("failed to attach transport")
}

/// Child: die mid-append while holding the lock.
fn run_crasher(path: &str) {
    let transport = open_transport(path);
    let mut locked = transport.lock().expect("crasher: failed to lock");

    let frame = locked.alloc(50).expect("crasher: alloc failed");
    frame.payload.fill(0xEE);

    log!("[CRASHER] allocated 50 bytes, exiting without commit");
    // Skip all destructors: the mutex stays held and the working state
    // stays diverged, exactly like a crash.
    unsafe { libc::_exit(0) };
}

#[test]
fn aborted_append_is_invisible_after_process_death() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let path = env::var(ENV_PATH).expect("BASALT_CRASH_PATH not set");
        match role.as_str() {
            ROLE_CRASHER => run_crasher(&path),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let path = format!("/tmp/basalt_crash_test_{}", std::process::id());
    let exe = env::current_exe().expect("failed to get current executable");

    // Seed the log with one committed frame.
    let transport = open_transport(&path);
    {
        let mut locked = transport.lock().unwrap();
        locked.alloc(6).unwrap().payload.copy_from_slice(b"before");
        locked.commit().unwrap();
    }

    log!("[PARENT] spawning crasher process");
    let status = Command::new(&exe)
        .arg("--exact")
        .arg("aborted_append_is_invisible_after_process_death")
        .env(ENV_ROLE, ROLE_CRASHER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .status()
        .expect("failed to spawn crasher");
    assert!(status.success(), "crasher exited with {status}");

    // The next lock adopts the dead owner's mutex and rolls back.
    {
        let mut locked = transport.lock().unwrap();
        assert_eq!(locked.seq_high(), 1, "aborted frame leaked into the log");
        locked.jump_tail().unwrap();
        assert_eq!(locked.frame().unwrap().payload, b"before");
        assert!(!locked.has_next());
    }

    // And the transport keeps working: commit from a fresh attach, as a
    // second process would.
    let transport2 = open_transport(&path);
    {
        let mut locked = transport2.lock().unwrap();
        locked.alloc(1).unwrap().payload.copy_from_slice(b"Y");
        locked.commit().unwrap();
    }

    let mut locked = transport.lock().unwrap();
    locked.jump_head().unwrap();
    assert_eq!(locked.frame().unwrap().payload, b"before");
    locked.next().unwrap();
    assert_eq!(locked.frame().unwrap().payload, b"Y");
    assert!(!locked.has_next());
    assert_eq!(locked.seq_low(), 1);
    assert_eq!(locked.seq_high(), 2);
    drop(locked);

    let _ = remove(&path);
    log!("[PARENT] crash recovery validated");
}
