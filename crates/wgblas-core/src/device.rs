//! The device/queue collaborator the execution engine submits kernels to.

use crate::error::DeviceError;
use crate::kernel::Kernel;
use crate::scalar::Scalar;
use async_channel::{Receiver, Sender};

/// A buffer living on a device.
pub trait DeviceBuffer {
    /// The element type.
    type Scalar: Scalar;

    /// The number of elements in this buffer.
    fn len(&self) -> u32;

    /// Is this buffer empty?
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Launch limits and preferences of a device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest number of work-items in one work-group.
    pub max_workgroup_size: u32,
    /// Largest number of work-groups along one dispatch dimension.
    pub max_workgroups_per_dimension: u32,
    /// Largest number of buffers one kernel may bind.
    pub max_bindings: u32,
    /// Preferred work-group size of elementwise kernels.
    pub workgroup_size: u32,
    /// Preferred work-group size of reduction kernels.
    pub reduction_workgroup_size: u32,
}

/// Fence and capabilities of a device, independent from its buffer type.
pub trait Queue {
    /// The device’s launch limits.
    fn limits(&self) -> DeviceLimits;

    /// Blocks until every submitted kernel completed.
    ///
    /// Returns [`DeviceError::Async`] if errors were raised asynchronously since the last call.
    fn wait(&self) -> Result<(), DeviceError>;
}

/// A device able to allocate buffers of type `B` and run kernels over them.
pub trait Device<B: DeviceBuffer>: Queue {
    /// Creates a buffer initialized with `data`.
    fn create_buffer(&self, data: &[B::Scalar]) -> B;

    /// Creates a zero-initialized buffer of `len` elements, for transient results.
    fn create_scratch(&self, len: u32) -> Result<B, DeviceError>;

    /// Queues the execution of `kernel`.
    ///
    /// Kernels submitted to the same device execute in submission order.
    fn submit(&self, kernel: &Kernel<'_, B>) -> Result<(), DeviceError>;
}

/// A caller-registered callback invoked with the errors collected asynchronously.
pub type AsyncHandler = Box<dyn Fn(&[DeviceError]) + Send + Sync>;

/// Collects errors raised while kernels run, until the next fence.
pub struct ErrorChannel {
    sender: Sender<DeviceError>,
    receiver: Receiver<DeviceError>,
    handler: Option<AsyncHandler>,
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorChannel {
    /// Creates a channel without handler.
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            sender,
            receiver,
            handler: None,
        }
    }

    /// Creates a channel calling `handler` each time errors are collected.
    pub fn with_handler(handler: AsyncHandler) -> Self {
        Self {
            handler: Some(handler),
            ..Self::new()
        }
    }

    /// A sender, typically moved into device callbacks.
    pub fn sender(&self) -> Sender<DeviceError> {
        self.sender.clone()
    }

    /// Records an error.
    pub fn report(&self, error: DeviceError) {
        tracing::warn!(%error, "asynchronous device error");
        // The receiver lives as long as `self`, and the channel is unbounded.
        let _ = self.sender.try_send(error);
    }

    /// Drains the collected errors, passes them to the handler, and returns them.
    pub fn throw(&self) -> Result<(), DeviceError> {
        let mut errors = vec![];
        while let Ok(error) = self.receiver.try_recv() {
            errors.push(error);
        }

        if errors.is_empty() {
            return Ok(());
        }

        if let Some(handler) = &self.handler {
            handler(&errors);
        }

        Err(DeviceError::Async(errors))
    }
}

#[cfg(test)]
mod test {
    use super::ErrorChannel;
    use crate::error::DeviceError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn errors_reach_handler_once() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = seen.clone();
        let channel = ErrorChannel::with_handler(Box::new(move |errors| {
            seen_in_handler.fetch_add(errors.len(), Ordering::SeqCst);
        }));

        assert_eq!(channel.throw(), Ok(()));
        channel.report(DeviceError::Gpu("lost".to_string()));
        channel.sender().try_send(DeviceError::Gpu("again".to_string())).unwrap();

        match channel.throw() {
            Err(DeviceError::Async(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(channel.throw(), Ok(()));
    }
}
