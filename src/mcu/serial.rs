//! Command submission and response dispatch on the reactor thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, trace};
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{short, Error, McuError, Result};

use super::command::Command;
use super::oid::Oid;
use super::transport::{Response, Transport};

type Handler = Rc<dyn Fn(&Response)>;

/// Reactor-local wrapper around the [`Transport`].
///
/// Routes every incoming message first to one-shot waiters registered by
/// [`Serial::send_with_response`], then to the persistent handler registered
/// for its `(name, oid)` pair.
pub struct Serial {
    transport: RefCell<Box<dyn Transport>>,
    handlers: RefCell<HashMap<(String, Option<Oid>), Handler>>,
    waiters: RefCell<HashMap<String, Vec<oneshot::Sender<Response>>>>,
    dispatcher: RefCell<Option<JoinHandle<()>>>,
    poll_interval: Duration,
    timeout: Duration,
}

impl Serial {
    /// Wrap a transport. Nothing is opened until [`Serial::connect`].
    pub fn new(transport: Box<dyn Transport>, poll_interval: Duration, timeout: Duration) -> Rc<Self> {
        Rc::new(Self {
            transport: RefCell::new(transport),
            handlers: RefCell::new(HashMap::new()),
            waiters: RefCell::new(HashMap::new()),
            dispatcher: RefCell::new(None),
            poll_interval,
            timeout,
        })
    }

    /// Register the handler for `name` messages about `oid` (or for every
    /// `name` message when `oid` is `None`). Replaces an earlier handler.
    pub fn register_response(&self, name: &str, oid: Option<Oid>, handler: impl Fn(&Response) + 'static) {
        self.handlers
            .borrow_mut()
            .insert((name.to_owned(), oid), Rc::new(handler));
    }

    /// Open the link and start dispatching its messages.
    ///
    /// Must be called on the reactor thread.
    pub fn connect(self: &Rc<Self>, port: &str, baud: u32) -> Result<()> {
        self.stop_dispatcher();
        debug!("connecting to {} at {} baud", port, baud);
        let responses = self.transport.borrow_mut().connect(port, baud)?;

        let task = tokio::task::spawn_local(Self::dispatch_loop(Rc::downgrade(self), responses));
        *self.dispatcher.borrow_mut() = Some(task);
        Ok(())
    }

    /// Close the link and drop any pending response waiters.
    pub fn disconnect(&self) {
        self.stop_dispatcher();
        self.transport.borrow_mut().disconnect();
        self.waiters.borrow_mut().clear();
        debug!("disconnected");
    }

    /// Send a command without waiting for a reply.
    pub fn send(&self, command: &Command) -> Result<()> {
        trace!("send: {}", command);
        self.transport.borrow_mut().send(command.as_str())
    }

    /// Send a command and wait for the next `reply` message.
    ///
    /// # Errors
    ///
    /// Returns `McuError::ResponseTimeout` if no reply arrives within the
    /// serial timeout.
    pub async fn send_with_response(&self, command: &Command, reply: &str) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.borrow_mut();
            let pending = waiters.entry(reply.to_owned()).or_default();
            pending.retain(|w| !w.is_closed());
            pending.push(tx);
        }
        self.send(command)?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Mcu(McuError::Transport(short("link closed while waiting")))),
            Err(_) => Err(Error::Mcu(McuError::ResponseTimeout(short(reply)))),
        }
    }

    /// Yield to other tasks for one poll interval.
    pub async fn pause(&self) {
        tokio::time::sleep(self.poll_interval).await;
    }

    /// Poll `done` every pause interval until it holds or `timeout` elapses.
    ///
    /// Returns whether `done` held.
    pub async fn poll_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.pause().await;
        }
    }

    /// Bound on request/response exchanges.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Host monotonic time in seconds.
    pub fn monotonic(&self) -> f64 {
        self.transport.borrow().monotonic()
    }

    /// Estimated MCU print time for a host monotonic time.
    pub fn estimated_print_time(&self, monotonic: f64) -> f64 {
        self.transport.borrow().estimated_print_time(monotonic)
    }

    /// MCU clock at a print time.
    pub fn print_time_to_clock(&self, print_time: f64) -> u64 {
        self.transport.borrow().print_time_to_clock(print_time)
    }

    /// MCU clock frequency in Hz.
    pub fn mcu_freq(&self) -> f64 {
        self.transport.borrow().mcu_freq()
    }

    fn stop_dispatcher(&self) {
        if let Some(task) = self.dispatcher.borrow_mut().take() {
            task.abort();
        }
    }

    async fn dispatch_loop(serial: Weak<Self>, mut responses: UnboundedReceiver<Response>) {
        while let Some(response) = responses.recv().await {
            match serial.upgrade() {
                Some(serial) => serial.dispatch(response),
                None => break,
            }
        }
    }

    fn dispatch(&self, response: Response) {
        trace!("recv: {} {:?}", response.name, response.params);

        let waiters = self.waiters.borrow_mut().remove(&response.name);
        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(response.clone());
        }

        let handler = {
            let handlers = self.handlers.borrow();
            let oid = response.oid();
            handlers
                .get(&(response.name.clone(), oid))
                .or_else(|| handlers.get(&(response.name.clone(), None)))
                .cloned()
        };
        if let Some(handler) = handler {
            handler(&response);
        }
    }
}
