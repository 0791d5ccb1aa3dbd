//! Thread-aware console output for build runs.
//!
//! Worker threads log through a per-thread buffer stack so that a task's
//! output is flushed as one contiguous block and never interleaves with
//! another task's output. With a single configured worker every write goes
//! straight through for responsiveness. Everything written to the console
//! is mirrored, uncolored, to a log file.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use colored::{Color, Colorize};

/// Label column start width; grows monotonically up to [`MAX_LABEL_WIDTH`].
const INITIAL_LABEL_WIDTH: usize = 25;
/// Hard clip for the label column so one long label cannot push every
/// following colon off the screen.
const MAX_LABEL_WIDTH: usize = 40;

thread_local! {
    static BUFFER_STACK: RefCell<Vec<Vec<Message>>> = const { RefCell::new(Vec::new()) };
}

/// A single buffered write: text, optional color, verbosity gate.
struct Message {
    text: String,
    color: Option<Color>,
    verbose: u8,
}

struct LogInner {
    file: File,
}

/// Buffered, colored, thread-aware build console.
///
/// One `Log` is shared by every component of a build; it is cheap to wrap
/// in an `Arc`. Writes made inside a [`Log::buffer_thread`] scope while
/// more than one worker is configured accumulate in a per-thread stack and
/// flush contiguously when the scope ends.
pub struct Log {
    inner: Mutex<LogInner>,
    verbose: u8,
    nocolor: bool,
    show_threads: bool,
    workers: AtomicUsize,
    maxlen: AtomicUsize,
}

impl Log {
    /// Open the console, creating (or truncating) the mirror log file.
    pub fn open(
        logfile: &Path,
        verbose: u8,
        nocolor: bool,
        show_threads: bool,
    ) -> io::Result<Self> {
        let file = File::create(logfile)?;
        Ok(Self {
            inner: Mutex::new(LogInner { file }),
            verbose,
            nocolor,
            show_threads,
            workers: AtomicUsize::new(1),
            maxlen: AtomicUsize::new(INITIAL_LABEL_WIDTH),
        })
    }

    /// Record how many scheduler workers are active.
    ///
    /// With one worker, writes skip the per-thread buffers entirely.
    pub fn set_workers(&self, count: usize) {
        self.workers.store(count.max(1), Ordering::Relaxed);
    }

    /// Begin a buffered scope for the current thread.
    ///
    /// All writes until the returned guard drops accumulate locally; the
    /// guard's drop flushes them under the console lock as one block.
    pub fn buffer_thread(&self) -> ThreadLogScope<'_> {
        BUFFER_STACK.with(|stack| stack.borrow_mut().push(Vec::new()));
        ThreadLogScope { log: self }
    }

    /// Write a line at verbosity 0.
    pub fn log(&self, msg: &str) {
        self.log_at(msg, None, 0);
    }

    /// Write a colored line at verbosity 0.
    pub fn log_colored(&self, msg: &str, color: Color) {
        self.log_at(msg, Some(color), 0);
    }

    /// Write a line that only reaches stdout at the given verbosity.
    ///
    /// The log file receives every line regardless of verbosity.
    pub fn log_verbose(&self, msg: &str, verbose: u8) {
        self.log_at(msg, None, verbose);
    }

    /// Write a line with explicit color and verbosity.
    pub fn log_at(&self, msg: &str, color: Option<Color>, verbose: u8) {
        self.write(msg, color, verbose, true);
        self.write("\n", None, verbose, true);
    }

    /// Start a padded `label: ` line without a result.
    ///
    /// At normal verbosity the line stays open so a following
    /// [`Log::passed`] or [`Log::failed`] completes it; one verbosity level
    /// up the newline prints immediately.
    pub fn check(&self, label: &str) {
        self.check_at(label, None, None, 0);
    }

    /// Write a padded `label: result` line in one call.
    pub fn check_result(&self, label: &str, result: &str, color: Option<Color>) {
        self.check_at(label, Some(result), color, 0);
    }

    /// `check` with explicit verbosity.
    pub fn check_at(&self, label: &str, result: Option<&str>, color: Option<Color>, verbose: u8) {
        let mut label = label.to_string();
        if self.show_threads {
            let name = std::thread::current()
                .name()
                .unwrap_or("worker")
                .to_string();
            let mut prefixed = String::new();
            let _ = write!(prefixed, "{:<10}: {}", name, label);
            label = prefixed;
        }

        // The column grows monotonically and clips at MAX_LABEL_WIDTH.
        self.maxlen
            .fetch_max((label.len() + 1).min(MAX_LABEL_WIDTH), Ordering::Relaxed);
        let width = self.maxlen.load(Ordering::Relaxed);
        let padded = format!("{:<width$}: ", label, width = width);

        match result {
            None => {
                self.write(&padded, color, verbose, true);
                self.write("\n", None, verbose + 1, true);
            }
            Some(result) => {
                self.write(&padded, None, verbose, true);
                self.write(result, color, verbose, true);
                self.write("\n", None, verbose, true);
            }
        }
    }

    /// Complete an open `check` line with a green `ok`.
    pub fn passed(&self) {
        self.log_colored("ok", Color::Green);
    }

    /// Complete an open `check` line with a custom success message.
    pub fn passed_with(&self, msg: &str) {
        self.log_colored(msg, Color::Green);
    }

    /// Complete an open `check` line with a yellow `failed`.
    pub fn failed(&self) {
        self.log_colored("failed", Color::Yellow);
    }

    /// Complete an open `check` line with a custom failure message.
    pub fn failed_with(&self, msg: &str) {
        self.log_colored(msg, Color::Yellow);
    }

    fn write(&self, text: &str, color: Option<Color>, verbose: u8, buffer: bool) {
        let msg = Message {
            text: text.to_string(),
            color,
            verbose,
        };

        if !buffer || self.workers.load(Ordering::Relaxed) <= 1 {
            let mut inner = self.inner.lock().unwrap();
            self.write_now(&mut inner, &msg);
            return;
        }

        let buffered = BUFFER_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.last_mut() {
                Some(frame) => {
                    frame.push(msg);
                    true
                }
                None => false,
            }
        });

        if !buffered {
            let mut inner = self.inner.lock().unwrap();
            let msg = Message {
                text: text.to_string(),
                color,
                verbose,
            };
            self.write_now(&mut inner, &msg);
        }
    }

    fn write_now(&self, inner: &mut LogInner, msg: &Message) {
        // The mirror file always receives the plain text.
        let _ = inner.file.write_all(msg.text.as_bytes());
        let _ = inner.file.flush();

        if msg.verbose <= self.verbose {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let rendered = match msg.color {
                Some(color) if !self.nocolor => msg.text.as_str().color(color).to_string(),
                _ => msg.text.clone(),
            };
            let _ = out.write_all(rendered.as_bytes());
            let _ = out.flush();
        }
    }

    fn flush_frame(&self, frame: Vec<Message>) {
        let mut inner = self.inner.lock().unwrap();
        for msg in &frame {
            self.write_now(&mut inner, msg);
        }
    }
}

/// RAII guard for a buffered logging scope.
///
/// Dropping the guard flushes the scope's accumulated output under the
/// console lock as one contiguous block.
pub struct ThreadLogScope<'a> {
    log: &'a Log,
}

impl Drop for ThreadLogScope<'_> {
    fn drop(&mut self) {
        let frame = BUFFER_STACK.with(|stack| stack.borrow_mut().pop());
        if let Some(frame) = frame {
            self.log.flush_frame(frame);
        }
    }
}
