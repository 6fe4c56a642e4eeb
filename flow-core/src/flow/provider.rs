//! Provider Implementation
//!
//! A provider is the origin of all propagation. It holds the current value and
//! a generation counter; the manager pushes a new value into it through
//! `Manager::update_value`, which then delivers or expires the successors.

use std::any::Any;

use super::erased::{Emit, ErasedNode, NodeCx};
use super::handle::FlowValue;
use super::worker::Payload;

/// Storage of a provider node.
#[derive(Debug)]
pub struct ProviderNode<T> {
    value: Option<T>,

    /// Number of values stored so far.
    generation: u64,
}

impl<T: FlowValue> ProviderNode<T> {
    pub(crate) fn new(value: Option<T>) -> Self {
        Self {
            generation: u64::from(value.is_some()),
            value,
        }
    }

    pub(crate) fn store(&mut self, value: T) {
        self.value = Some(value);
        self.generation += 1;
    }

    /// The current value, if one was ever stored.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Get the number of values stored so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T: FlowValue> ErasedNode for ProviderNode<T> {
    fn accept(&mut self, _input: &dyn Any, _cx: &mut NodeCx<'_>) -> Emit {
        // providers have no incoming edges
        Emit::Halt
    }

    fn wants_input(&self, _expired: bool) -> bool {
        false
    }

    fn serve(&mut self, _input: Option<&dyn Any>, _cx: &mut NodeCx<'_>) -> Option<Payload> {
        self.value.clone().map(|value| Box::new(value) as Payload)
    }

    fn complete(&mut self, _invocation: u64, _output: Option<Payload>, _panicked: bool) -> Emit {
        Emit::Halt
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_provider_has_generation_zero() {
        let provider = ProviderNode::<i32>::new(None);
        assert!(provider.value().is_none());
        assert_eq!(provider.generation(), 0);
    }

    #[test]
    fn store_bumps_generation() {
        let mut provider = ProviderNode::new(Some(1));
        assert_eq!(provider.generation(), 1);

        provider.store(2);
        provider.store(2);
        assert_eq!(provider.value(), Some(&2));
        assert_eq!(provider.generation(), 3);
    }
}
