use futures::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use crate::CancelHandle;
use crate::ChannelRegistry;
use crate::DeviceTrait;
use crate::Error;
use crate::OutputConfig;
use crate::SampleBuffer;
use crate::Session;
use crate::State;

/// Streams sample buffers to the analog outputs of a device.
///
/// Every call to [`process`](AnalogOutput::process) or
/// [`process_iter`](AnalogOutput::process_iter) is a separate activation with its own task,
/// created when the returned adapter is first polled and disposed when it ends or is dropped.
/// Buffers are forwarded unchanged after they have been written.
pub struct AnalogOutput<D: DeviceTrait + Clone> {
    device: D,
    config: OutputConfig,
    activations: AtomicUsize,
}

impl<D: DeviceTrait + Clone> AnalogOutput<D> {
    pub fn new(device: D, config: OutputConfig) -> Self {
        Self {
            device,
            config,
            activations: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Changes apply to activations created afterwards.
    pub fn config_mut(&mut self) -> &mut OutputConfig {
        &mut self.config
    }

    pub fn channels_mut(&mut self) -> &mut ChannelRegistry {
        &mut self.config.channels
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// A fresh, unbuilt session with a snapshot of the current configuration.
    pub fn session(&self) -> Session<D> {
        let n = self.activations.fetch_add(1, Ordering::SeqCst);
        Session::new(
            self.device.clone(),
            Arc::new(self.config.clone()),
            format!("analog-output-{n}"),
        )
    }

    /// Write every buffer of `input` and yield it back.
    ///
    /// Device calls block the polling thread; drive the stream from a context that may block.
    pub fn process<St>(&self, input: St) -> Process<D, St>
    where
        St: Stream + Unpin,
        St::Item: SampleBuffer,
    {
        Process {
            input,
            forwarder: Forwarder::new(self.session()),
        }
    }

    /// Blocking counterpart of [`process`](AnalogOutput::process).
    pub fn process_iter<I>(&self, input: I) -> ProcessIter<D, I::IntoIter>
    where
        I: IntoIterator,
        I::Item: SampleBuffer,
    {
        ProcessIter {
            input: input.into_iter(),
            forwarder: Forwarder::new(self.session()),
        }
    }
}

struct Forwarder<D: DeviceTrait> {
    session: Session<D>,
    started: bool,
    done: bool,
}

impl<D: DeviceTrait> Forwarder<D> {
    fn new(session: Session<D>) -> Self {
        Self {
            session,
            started: false,
            done: false,
        }
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.session.activate().map_err(|e| self.abort(e))
    }

    fn forward<B: SampleBuffer>(&mut self, buffer: B) -> Result<B, Error> {
        let written = self.session.write(buffer.samples());
        match written {
            Ok(_) => Ok(buffer),
            Err(e) => Err(self.abort(e)),
        }
    }

    fn finish(&mut self) -> Option<Error> {
        self.done = true;
        self.session.dispose().err()
    }

    fn abort(&mut self, e: Error) -> Error {
        if let Some(d) = self.finish() {
            log::warn!("{}: disposal after {e} failed: {d}", self.session.name());
        }
        e
    }
}

/// Stream returned by [`AnalogOutput::process`].
pub struct Process<D: DeviceTrait, St> {
    input: St,
    forwarder: Forwarder<D>,
}

impl<D: DeviceTrait, St> Process<D, St> {
    pub fn state(&self) -> State {
        self.forwarder.session.state()
    }
    pub fn cancel_handle(&self) -> CancelHandle {
        self.forwarder.session.cancel_handle()
    }
}

impl<D: DeviceTrait, St: Unpin> Unpin for Process<D, St> {}

impl<D, St> Stream for Process<D, St>
where
    D: DeviceTrait,
    St: Stream + Unpin,
    St::Item: SampleBuffer,
{
    type Item = Result<St::Item, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.forwarder.done {
            return Poll::Ready(None);
        }
        if let Err(e) = this.forwarder.start() {
            return Poll::Ready(Some(Err(e)));
        }
        match this.input.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(buffer)) => Poll::Ready(Some(this.forwarder.forward(buffer))),
            Poll::Ready(None) => Poll::Ready(this.forwarder.finish().map(Err)),
        }
    }
}

/// Iterator returned by [`AnalogOutput::process_iter`].
pub struct ProcessIter<D: DeviceTrait, I> {
    input: I,
    forwarder: Forwarder<D>,
}

impl<D: DeviceTrait, I> ProcessIter<D, I> {
    pub fn state(&self) -> State {
        self.forwarder.session.state()
    }
    pub fn cancel_handle(&self) -> CancelHandle {
        self.forwarder.session.cancel_handle()
    }
}

impl<D, I> Iterator for ProcessIter<D, I>
where
    D: DeviceTrait,
    I: Iterator,
    I::Item: SampleBuffer,
{
    type Item = Result<I::Item, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.forwarder.done {
            return None;
        }
        if let Err(e) = self.forwarder.start() {
            return Some(Err(e));
        }
        match self.input.next() {
            Some(buffer) => Some(self.forwarder.forward(buffer)),
            None => self.forwarder.finish().map(Err),
        }
    }
}
