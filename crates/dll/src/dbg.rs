//! `tracing` writer for the debugger output of the host application.
//!
//! OpenXR applications rarely own a console. Each event becomes one tagged
//! `OutputDebugStringW` line, readable with [DebugView](https://docs.microsoft.com/en-us/sysinternals/downloads/debugview).

use std::io::{self, Write};

use parking_lot::{Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

/// Receives one NUL terminated UTF-16 event.
pub type Sink = fn(&[u16]);

#[cfg(windows)]
pub fn output_debug_string(line: &[u16]) {
    use windows::{Win32::System::Diagnostics::Debug::OutputDebugStringW, core::PCWSTR};

    unsafe { OutputDebugStringW(PCWSTR(line.as_ptr())) };
}

pub struct DebuggerMakeWriter {
    tag: &'static str,
    sink: Sink,
    line: Mutex<Vec<u16>>,
}

impl DebuggerMakeWriter {
    pub fn new(tag: &'static str, sink: Sink) -> Self {
        Self {
            tag,
            sink,
            line: Mutex::new(Vec::new()),
        }
    }
}

impl<'a> MakeWriter<'a> for DebuggerMakeWriter {
    type Writer = DebuggerWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        let mut line = self.line.lock();
        line.clear();
        line.extend(format!("[{}] ", self.tag).encode_utf16());

        DebuggerWriter {
            sink: self.sink,
            line,
        }
    }
}

/// Buffers one event and hands it to the sink on drop.
pub struct DebuggerWriter<'a> {
    sink: Sink,
    line: MutexGuard<'a, Vec<u16>>,
}

impl Write for DebuggerWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // interior NULs would cut the line short
        self.line.extend(
            String::from_utf8_lossy(buf)
                .encode_utf16()
                .map(|unit| if unit == 0 { 0xfffd } else { unit }),
        );
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DebuggerWriter<'_> {
    fn drop(&mut self) {
        self.line.push(0);
        (self.sink)(&self.line);
        self.line.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static WRITTEN: Mutex<Vec<String>> = Mutex::new(Vec::new());
    static LOGGED: Mutex<Vec<String>> = Mutex::new(Vec::new());

    fn decode(line: &[u16]) -> String {
        assert_eq!(line.last(), Some(&0));
        String::from_utf16_lossy(&line[..line.len() - 1])
    }

    fn written(line: &[u16]) {
        WRITTEN.lock().push(decode(line));
    }

    fn logged(line: &[u16]) {
        LOGGED.lock().push(decode(line));
    }

    #[test]
    fn one_sink_call_per_event() {
        let make_writer = DebuggerMakeWriter::new("layer", written);

        {
            let mut writer = make_writer.make_writer();
            writer.write_all(b"created ").unwrap();
            writer.write_all(b"session\n").unwrap();
        }
        make_writer.make_writer().write_all(b"a\0b").unwrap();

        assert_eq!(
            *WRITTEN.lock(),
            ["[layer] created session\n", "[layer] a\u{fffd}b"]
        );
    }

    #[test]
    fn subscriber_events_reach_the_sink() {
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(DebuggerMakeWriter::new("vk-d3d12-interop", logged))
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("runtime adapter found");
        });

        let logged = LOGGED.lock();
        assert_eq!(logged.len(), 1);
        assert!(logged[0].starts_with("[vk-d3d12-interop] "));
        assert!(logged[0].contains("runtime adapter found"));
    }
}
