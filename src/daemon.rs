// Copyright (c) 2012 Ian Godin. All rights reserved.
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Detaching the server from its controlling terminal.

use std::io;

/// Turns the process into a daemon: closes every inherited descriptor,
/// reopens 0/1/2 on `/dev/null`, and double-forks around a new session.
/// `foreground` skips the detach, but the umask is cleared and the process
/// moves to the filesystem root either way, so a running server never pins a
/// mount.
pub fn daemonize(foreground: bool) -> io::Result<()> {
    unsafe {
        libc::umask(0);
    }

    if !foreground {
        close_all_files()?;
        fork_and_exit()?;
        if unsafe { libc::setsid() } < 0 {
            return Err(io::Error::last_os_error());
        }
        // Fork once more so the daemon can never reacquire a controlling
        // tty.
        fork_and_exit()?;
    }

    if unsafe { libc::chdir(b"/\0".as_ptr() as *const libc::c_char) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn write_pidfile(path: &str) -> io::Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))
}

fn close_all_files() -> io::Result<()> {
    let mut rl = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) } < 0 {
        return Err(io::Error::last_os_error());
    }
    let max = if rl.rlim_max == libc::RLIM_INFINITY { 1024 } else { rl.rlim_max.min(65536) };
    for fd in 0..max as libc::c_int {
        unsafe {
            libc::close(fd);
        }
    }

    let fd0 = unsafe { libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_RDWR) };
    let fd1 = unsafe { libc::dup(fd0) };
    let fd2 = unsafe { libc::dup(fd0) };
    if fd0 != 0 || fd1 != 1 || fd2 != 2 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("unexpected file descriptors {} {} {}", fd0, fd1, fd2),
        ));
    }
    Ok(())
}

// Fork and let the parent exit, so the child is never a process group
// leader.
fn fork_and_exit() -> io::Result<()> {
    match unsafe { libc::fork() } {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(()),
        _ => std::process::exit(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_pidfile_records_the_process_id() {
        let path = std::env::temp_dir().join(format!("dhcpdb-pid-{}", std::process::id()));
        let path = path.to_str().expect("temp paths are utf-8").to_string();

        write_pidfile(&path).expect("pidfile is writable");
        let written = std::fs::read_to_string(&path).expect("pidfile is readable");
        assert_eq!(written, format!("{}\n", std::process::id()));

        std::fs::remove_file(&path).expect("pidfile is removable");
    }

    #[test]
    fn test_write_pidfile_to_unwritable_path_fails() {
        assert!(write_pidfile("/nonexistent-dir/dhcpdb.pid").is_err());
    }
}
