//! Named pipe IPC over UNIX-domain sockets.
//!
//! A listener binds a stream socket at `/tmp/.<name>` with mode 0666 and
//! runs one accept thread; each accepted connection is handed to the
//! request handler after peer authentication. When an allowed user is
//! configured, connections from any other user are rejected.

#![cfg(unix)]

use std::ffi::CStr;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Result, TransportError};

/// Handler invoked for each accepted pipe connection.
pub type PipeRequestHandler = dyn Fn(&mut NamedPipe) + Send + Sync;

fn pipe_path(name: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/.{name}"))
}

/// Effective UID of the peer of a connected UNIX-domain socket.
fn peer_uid(stream: &UnixStream) -> std::io::Result<libc::uid_t> {
    let fd = stream.as_raw_fd();

    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(cred.uid)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        let mut euid: libc::uid_t = 0;
        let mut egid: libc::gid_t = 0;
        let rc = unsafe { libc::getpeereid(fd, &mut euid, &mut egid) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(euid)
    }
}

/// Login name for a UID, falling back to `[uid]` when the account is not
/// resolvable.
fn user_name(uid: libc::uid_t) -> String {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = [0i8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc == 0 && !result.is_null() {
        let name = unsafe { CStr::from_ptr(pwd.pw_name) };
        name.to_string_lossy().into_owned()
    } else {
        format!("[{uid}]")
    }
}

/// Listener end of a named pipe.
pub struct NamedPipeListener {
    name: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NamedPipeListener {
    /// Creates the socket and starts the accept thread. `allowed_user`
    /// restricts connections to one login name; `None` admits everyone.
    pub fn create(
        name: &str,
        handler: Arc<PipeRequestHandler>,
        allowed_user: Option<&str>,
    ) -> Result<NamedPipeListener> {
        let path = pipe_path(name);
        let _ = fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = stop.clone();
            let name = name.to_owned();
            let allowed_user = allowed_user.map(str::to_owned);
            thread::Builder::new()
                .name(format!("pipe/{name}"))
                .spawn(move || {
                    Self::server_thread(&name, listener, handler, allowed_user, stop)
                })?
        };

        Ok(NamedPipeListener {
            name: name.to_owned(),
            stop,
            thread: Some(thread),
        })
    }

    fn server_thread(
        name: &str,
        listener: UnixListener,
        handler: Arc<PipeRequestHandler>,
        allowed_user: Option<String>,
        stop: Arc<AtomicBool>,
    ) {
        log::debug!("pipe listener {name}: waiting for connections");
        while !stop.load(Ordering::Acquire) {
            let stream = match listener.accept() {
                Ok((stream, _)) => stream,
                Err(e) => {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    log::debug!("pipe listener {name}: accept failed: {e}");
                    continue;
                }
            };
            if stop.load(Ordering::Acquire) {
                break;
            }

            let user = match peer_uid(&stream) {
                Ok(uid) => user_name(uid),
                Err(_) => "[unknown]".to_owned(),
            };
            if let Some(allowed) = &allowed_user {
                if *allowed != user {
                    log::debug!("pipe listener {name}: rejected connection by user {user}");
                    continue;
                }
            }
            log::debug!("pipe listener {name}: accepted connection by user {user}");

            let mut pipe = NamedPipe {
                stream,
                user: Some(user),
                write_lock: Mutex::new(()),
            };
            handler(&mut pipe);
        }
        log::debug!("pipe listener {name}: stopped");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the accept thread and removes the socket.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // A throwaway connection unblocks accept().
        let _ = UnixStream::connect(pipe_path(&self.name));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let _ = fs::remove_file(pipe_path(&self.name));
    }
}

impl Drop for NamedPipeListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One end of a connected named pipe. Writes are serialized by a per-pipe
/// mutex.
pub struct NamedPipe {
    stream: UnixStream,
    user: Option<String>,
    write_lock: Mutex<()>,
}

impl NamedPipe {
    /// Connects to a listener by name, retrying until `timeout` while the
    /// listener is not yet up.
    pub fn connect(name: &str, timeout: Duration) -> Result<NamedPipe> {
        let path = pipe_path(name);
        let deadline = Instant::now() + timeout;
        loop {
            match UnixStream::connect(&path) {
                Ok(stream) => {
                    return Ok(NamedPipe {
                        stream,
                        user: None,
                        write_lock: Mutex::new(()),
                    });
                }
                Err(e) => {
                    if Instant::now() >= deadline {
                        log::debug!("pipe {name}: connect failed: {e}");
                        return Err(e.into());
                    }
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// Peer login name; only known on the listener side.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        (&self.stream).write_all(data)?;
        Ok(())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream.read(buf)?)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.stream.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                e.into()
            }
        })
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn listener_echoes_to_client() {
        let handler: Arc<PipeRequestHandler> = Arc::new(|pipe: &mut NamedPipe| {
            assert!(pipe.user().is_some());
            let mut buf = [0u8; 5];
            pipe.read_exact(&mut buf).unwrap();
            pipe.write(&buf).unwrap();
        });
        let mut listener =
            NamedPipeListener::create("mpm-test-echo", handler, None).unwrap();

        let mut client = NamedPipe::connect("mpm-test-echo", Duration::from_secs(2)).unwrap();
        client.write(b"hello").unwrap();
        let mut reply = [0u8; 5];
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"hello");

        listener.stop();
    }

    #[test]
    #[serial]
    fn mismatched_user_is_rejected() {
        let handler: Arc<PipeRequestHandler> = Arc::new(|pipe: &mut NamedPipe| {
            let _ = pipe.write(b"ok");
        });
        let mut listener = NamedPipeListener::create(
            "mpm-test-authz",
            handler,
            Some("no-such-user-zzz"),
        )
        .unwrap();

        let mut client = NamedPipe::connect("mpm-test-authz", Duration::from_secs(2)).unwrap();
        client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let mut buf = [0u8; 2];
        // The listener drops the connection without serving it.
        assert!(client.read_exact(&mut buf).is_err());

        listener.stop();
    }

    #[test]
    #[serial]
    fn connect_to_missing_listener_times_out() {
        let result = NamedPipe::connect("mpm-test-absent", Duration::from_millis(200));
        assert!(result.is_err());
    }
}
