// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn spawn_echo_and_read_output() -> anyhow::Result<()> {
    let process = PtyProcess::spawn(
        &["echo".into(), "pty-hello".into()],
        std::path::Path::new("/tmp"),
        &[],
        80,
        24,
    )?;

    let mut collected = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        match read_chunk(&process.master, &mut buf).await {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
            Err(e) => return Err(e.into()),
        }
    }
    let text = String::from_utf8_lossy(&collected);
    assert!(text.contains("pty-hello"), "output: {text:?}");

    reap_blocking(process.child_pid());
    Ok(())
}

#[tokio::test]
async fn spawn_respects_cwd() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let process = PtyProcess::spawn(
        &["pwd".into()],
        dir.path(),
        &[],
        80,
        24,
    )?;

    let mut collected = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        match read_chunk(&process.master, &mut buf).await {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
            Err(e) => return Err(e.into()),
        }
    }
    let text = String::from_utf8_lossy(&collected);
    let dir_name = dir.path().file_name().map(|n| n.to_string_lossy().into_owned());
    assert!(
        dir_name.map(|n| text.contains(&n)).unwrap_or(false),
        "output: {text:?}"
    );

    reap_blocking(process.child_pid());
    Ok(())
}

#[test]
fn empty_command_is_rejected() {
    assert!(PtyProcess::spawn(&[], std::path::Path::new("/tmp"), &[], 80, 24).is_err());
}

#[test]
fn liveness_probe() {
    // Our own pid is alive; pid 0 after i32 conversion edge cases and a
    // certainly-unused huge pid are not probed as alive.
    assert!(is_pid_alive(std::process::id()));
    assert!(!is_pid_alive(u32::MAX));
}
