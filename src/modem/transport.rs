//! Trait abstraction for the modem byte transport to enable testing

use std::io;

/// Byte-level transport to the modem
///
/// Reads are never allowed to block: [`read_byte`](Transport::read_byte)
/// returns `Ok(None)` when nothing is waiting.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Write all data to the modem
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Number of received bytes waiting to be read
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read one byte if one is waiting
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Inner {
        written: Vec<Vec<u8>>,
        incoming: VecDeque<u8>,
        rules: Vec<(String, VecDeque<String>)>,
        write_error: Option<io::ErrorKind>,
        read_error: Option<io::ErrorKind>,
    }

    /// Scripted modem for testing
    ///
    /// Records every write and answers commands from a table of rules: when a
    /// written command contains a rule's pattern, the rule's next reply is
    /// queued as incoming bytes. The last reply of a rule repeats forever.
    /// Clones share state so a test can keep a handle after boxing one.
    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        inner: Rc<RefCell<Inner>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn boxed(&self) -> Box<dyn Transport> {
            Box::new(self.clone())
        }

        /// Answer commands containing `pattern` with `replies`, in order.
        pub fn respond(&self, pattern: &str, replies: &[&str]) {
            let mut inner = self.inner.borrow_mut();
            let replies = replies.iter().map(|r| r.to_string()).collect();
            inner.rules.retain(|(p, _)| p != pattern);
            inner.rules.push((pattern.to_string(), replies));
        }

        pub fn push_incoming(&self, data: &[u8]) {
            self.inner.borrow_mut().incoming.extend(data.iter().copied());
        }

        pub fn written(&self) -> Vec<Vec<u8>> {
            self.inner.borrow().written.clone()
        }

        /// Written chunks as lossy text with the CRLF terminator removed.
        pub fn written_commands(&self) -> Vec<String> {
            self.inner
                .borrow()
                .written
                .iter()
                .map(|w| String::from_utf8_lossy(w).trim_end_matches("\r\n").to_string())
                .collect()
        }

        pub fn count_written(&self, prefix: &str) -> usize {
            self.written_commands()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }

        pub fn set_write_error(&self, error: io::ErrorKind) {
            self.inner.borrow_mut().write_error = Some(error);
        }

        pub fn set_read_error(&self, error: io::ErrorKind) {
            self.inner.borrow_mut().read_error = Some(error);
        }
    }

    impl Transport for ScriptedTransport {
        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let mut inner = self.inner.borrow_mut();
            if let Some(error) = inner.write_error {
                return Err(io::Error::new(error, "Mock write error"));
            }
            inner.written.push(data.to_vec());

            let text = String::from_utf8_lossy(data).to_string();
            let reply = inner
                .rules
                .iter_mut()
                .find(|(pattern, _)| text.contains(pattern.as_str()))
                .and_then(|(_, replies)| {
                    if replies.len() > 1 {
                        replies.pop_front()
                    } else {
                        replies.front().cloned()
                    }
                });
            if let Some(reply) = reply {
                inner.incoming.extend(reply.into_bytes());
            }
            Ok(())
        }

        fn bytes_available(&mut self) -> io::Result<usize> {
            Ok(self.inner.borrow().incoming.len())
        }

        fn read_byte(&mut self) -> io::Result<Option<u8>> {
            let mut inner = self.inner.borrow_mut();
            if let Some(error) = inner.read_error {
                return Err(io::Error::new(error, "Mock read error"));
            }
            Ok(inner.incoming.pop_front())
        }
    }
}
