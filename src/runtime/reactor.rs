use {
    anyhow::{Context, Result},
    nix::sys::epoll::{
        epoll_create1, epoll_ctl, epoll_wait, EpollCreateFlags, EpollEvent, EpollFlags, EpollOp,
    },
    std::{
        os::unix::io::RawFd,
        time::{Duration, Instant},
    },
};

/// Readiness edge reported for a registered descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub token: u64,
    pub read: bool,
    pub write: bool,
    pub error: bool,
}

/// Edge-triggered readiness notification over a set of descriptors.
///
/// The reactor owns no handlers; the caller dispatches on the token it
/// registered. Combined with [`super::Timers::next_deadline`] this is
/// the whole suspension surface of the main thread.
pub struct Reactor {
    epfd: RawFd,
    events: Vec<EpollEvent>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let epfd = epoll_create1(EpollCreateFlags::EPOLL_CLOEXEC)
            .context("reactor: epoll_create1")?;
        Ok(Reactor {
            epfd,
            events: vec![EpollEvent::empty(); 64],
        })
    }

    fn flags(read: bool, write: bool) -> EpollFlags {
        let mut flags = EpollFlags::EPOLLET;
        if read {
            flags |= EpollFlags::EPOLLIN;
        }
        if write {
            flags |= EpollFlags::EPOLLOUT;
        }
        flags
    }

    pub fn register(&mut self, fd: RawFd, token: u64, read: bool, write: bool) -> Result<()> {
        let mut event = EpollEvent::new(Self::flags(read, write), token);
        epoll_ctl(self.epfd, EpollOp::EpollCtlAdd, fd, &mut event)
            .context("reactor: epoll_ctl add")?;
        Ok(())
    }

    pub fn modify(&mut self, fd: RawFd, token: u64, read: bool, write: bool) -> Result<()> {
        let mut event = EpollEvent::new(Self::flags(read, write), token);
        epoll_ctl(self.epfd, EpollOp::EpollCtlMod, fd, &mut event)
            .context("reactor: epoll_ctl mod")?;
        Ok(())
    }

    pub fn unregister(&mut self, fd: RawFd) -> Result<()> {
        epoll_ctl(self.epfd, EpollOp::EpollCtlDel, fd, None)
            .context("reactor: epoll_ctl del")?;
        Ok(())
    }

    /// Waits until readiness or `deadline`, whichever is earlier.
    pub fn wait(&mut self, deadline: Option<Instant>) -> Result<Vec<Edge>> {
        let timeout = match deadline {
            None => -1,
            Some(d) => {
                let now = Instant::now();
                if d <= now {
                    0
                } else {
                    duration_ms(d - now)
                }
            }
        };

        let count = match epoll_wait(self.epfd, &mut self.events, timeout) {
            Ok(n) => n,
            Err(nix::Error::EINTR) => 0,
            Err(e) => return Err(e).context("reactor: epoll_wait"),
        };

        let mut edges = Vec::with_capacity(count);
        for event in &self.events[..count] {
            let flags = event.events();
            edges.push(Edge {
                token: event.data(),
                read: flags.intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI),
                write: flags.contains(EpollFlags::EPOLLOUT),
                error: flags.intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP),
            });
        }
        Ok(edges)
    }
}

fn duration_ms(d: Duration) -> isize {
    d.as_millis().min(isize::MAX as u128) as isize
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.epfd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::{
        sys::socket::{socketpair, AddressFamily, SockFlag, SockProtocol, SockType},
        unistd,
    };

    #[test]
    fn readiness_carries_token() {
        let (rx, tx) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None::<SockProtocol>,
            SockFlag::SOCK_NONBLOCK,
        )
        .unwrap();
        let mut reactor = Reactor::new().unwrap();
        reactor.register(rx, 42, true, false).unwrap();

        // nothing pending: an elapsed deadline returns immediately
        let edges = reactor.wait(Some(Instant::now())).unwrap();
        assert!(edges.is_empty());

        unistd::write(tx, &[0u8]).unwrap();
        let edges = reactor
            .wait(Some(Instant::now() + Duration::from_secs(1)))
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].token, 42);
        assert!(edges[0].read);

        reactor.unregister(rx).unwrap();
        let _ = unistd::close(rx);
        let _ = unistd::close(tx);
    }
}
