/// Type-state markers for the builder pattern
///
/// These types track which required fields have been set in the builder
/// at compile-time, so a client without an endpoint or a framing cannot be
/// built.

use std::marker::PhantomData;

/// Marker trait for endpoint state
pub trait EndpointState {}

/// Endpoint has not been set
pub struct NoEndpoint;
impl EndpointState for NoEndpoint {}

/// Endpoint has been set
pub struct HasEndpoint;
impl EndpointState for HasEndpoint {}

/// Marker trait for framing state
pub trait FramingState {}

/// Framing has not been set
pub struct NoFraming;
impl FramingState for NoFraming {}

/// Framing has been set
pub struct HasFraming;
impl FramingState for HasFraming {}

/// Phantom marker to prevent direct construction
#[derive(Debug, Clone, Copy)]
pub struct TypeState<E, F> {
    _endpoint: PhantomData<E>,
    _framing: PhantomData<F>,
}

impl<E, F> TypeState<E, F> {
    pub(crate) fn new() -> Self {
        Self {
            _endpoint: PhantomData,
            _framing: PhantomData,
        }
    }
}

impl<E, F> Default for TypeState<E, F> {
    fn default() -> Self {
        Self::new()
    }
}
