//! Typed node handles.
//!
//! A handle is a copyable, non-owning reference to a node living inside a
//! [`Manager`](crate::Manager). Handles carry the value types of the node they
//! point to, which is how edge types are checked at compile time: an edge
//! `from -> to` only type-checks when `from: Upstream<T>` and
//! `to: Downstream<T>` agree on `T`.
//!
//! A handle is only meaningful for the manager that created it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::graph::NodeId;

/// Values that can flow along edges.
///
/// Values are cloned into caches and sent to worker threads, hence the bounds.
pub trait FlowValue: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> FlowValue for T {}

/// Anything that identifies a node.
pub trait NodeHandle: Copy {
    fn id(&self) -> NodeId;
}

/// A node producing values of type `T` on its outgoing edges.
pub trait Upstream<T>: NodeHandle {}

/// A node accepting values of type `T` on its incoming edges.
pub trait Downstream<T>: NodeHandle {}

impl NodeHandle for NodeId {
    fn id(&self) -> NodeId {
        *self
    }
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident<$($param:ident),+>, $marker:ty) => {
        $(#[$meta])*
        pub struct $name<$($param),+> {
            id: NodeId,
            _marker: PhantomData<$marker>,
        }

        impl<$($param),+> $name<$($param),+> {
            pub(crate) fn new(id: NodeId) -> Self {
                Self { id, _marker: PhantomData }
            }
        }

        impl<$($param),+> NodeHandle for $name<$($param),+> {
            fn id(&self) -> NodeId {
                self.id
            }
        }

        impl<$($param),+> Clone for $name<$($param),+> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<$($param),+> Copy for $name<$($param),+> {}

        impl<$($param),+> PartialEq for $name<$($param),+> {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl<$($param),+> Eq for $name<$($param),+> {}

        impl<$($param),+> Hash for $name<$($param),+> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        impl<$($param),+> fmt::Debug for $name<$($param),+> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.id)
            }
        }
    };
}

typed_handle!(
    /// Handle to a provider holding a `T`.
    ProviderRef<T>,
    fn() -> T
);

typed_handle!(
    /// Handle to a modifier turning `In` into `Out`.
    ModifierRef<In, Out>,
    fn(In) -> Out
);

typed_handle!(
    /// Handle to a terminal consuming `T` through the consumer `C`.
    TerminalRef<T, C>,
    fn(T) -> C
);

impl<T> Upstream<T> for ProviderRef<T> {}

impl<In, Out> Upstream<Out> for ModifierRef<In, Out> {}

impl<In, Out> Downstream<In> for ModifierRef<In, Out> {}

impl<T, C> Downstream<T> for TerminalRef<T, C> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<H: Send + Sync>(_: H) {}

    #[test]
    fn handles_are_copy_and_compare_by_id() {
        let a: ProviderRef<String> = ProviderRef::new(NodeId::from(1));
        let b = a;
        assert_eq!(a, b);
        assert_eq!(a.id(), NodeId::from(1));
        assert_eq!(format!("{a:?}"), "ProviderRef(#1)");
    }

    #[test]
    fn handles_are_send_regardless_of_value_type() {
        let handle: TerminalRef<std::rc::Rc<i32>, ()> = TerminalRef::new(NodeId::from(0));
        assert_send_sync(handle);
    }
}
