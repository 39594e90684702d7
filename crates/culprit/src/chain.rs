//! Causal-chain traversal: cause lookup, membership tests, and type-directed
//! extraction.
//!
//! Chains are finite and acyclic by construction (causes are linked in at
//! construction time and only ever point at pre-existing errors), so every
//! walk here terminates without cycle detection.

use std::error::Error as StdError;
use std::sync::Arc;

use crate::error::{Cause, Error, Message, SharedError};

/// A node of the causal chain, as seen by membership tests.
#[derive(Clone, Copy)]
enum Node<'a> {
    Traced(&'a Error),
    Shared(&'a SharedError),
}

/// What [`Error::is`] compares chain nodes against: an augmented error
/// (matched by record identity) or a shared foreign error (matched by
/// allocation identity).
#[derive(Clone, Copy)]
pub enum ErrorTarget<'a> {
    Traced(&'a Error),
    Shared(&'a SharedError),
}

impl<'a> From<&'a Error> for ErrorTarget<'a> {
    fn from(err: &'a Error) -> Self {
        ErrorTarget::Traced(err)
    }
}

impl<'a> From<&'a SharedError> for ErrorTarget<'a> {
    fn from(err: &'a SharedError) -> Self {
        ErrorTarget::Shared(err)
    }
}

/// A chain-membership probe for [`Error::contains`]: either a message string
/// (matched by value against each link's own text) or an error (matched by
/// identity against the cause spine and against error-valued messages).
#[derive(Clone, Copy)]
pub enum ChainValue<'a> {
    Message(&'a str),
    Error(ErrorTarget<'a>),
}

impl<'a> From<&'a str> for ChainValue<'a> {
    fn from(message: &'a str) -> Self {
        ChainValue::Message(message)
    }
}

impl<'a> From<&'a Error> for ChainValue<'a> {
    fn from(err: &'a Error) -> Self {
        ChainValue::Error(ErrorTarget::Traced(err))
    }
}

impl<'a> From<&'a SharedError> for ChainValue<'a> {
    fn from(err: &'a SharedError) -> Self {
        ChainValue::Error(ErrorTarget::Shared(err))
    }
}

impl<'a> From<ErrorTarget<'a>> for ChainValue<'a> {
    fn from(target: ErrorTarget<'a>) -> Self {
        ChainValue::Error(target)
    }
}

/// Iterator over a causal chain as `&dyn Error`, outermost error first,
/// following [`StdError::source`] links.
pub struct Chain<'a> {
    next: Option<&'a (dyn StdError + 'static)>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a (dyn StdError + 'static);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.source();
        Some(current)
    }
}

impl Error {
    /// Iterates over this error and every cause below it.
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// The innermost error of the chain: the foreign error the chain
    /// terminates at, or the deepest augmented error when there is none.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current = self;
        loop {
            match current.cause() {
                Some(Cause::Traced(next)) => current = next,
                Some(Cause::Shared(shared)) => return &**shared,
                None => return current,
            }
        }
    }

    /// True when `target` is this error or appears anywhere down its cause
    /// spine.
    ///
    /// Matching is by identity: augmented errors match when they share a
    /// record, shared foreign errors when they share an allocation.
    pub fn is<'a>(&self, target: impl Into<ErrorTarget<'a>>) -> bool {
        let target = target.into();
        self.nodes().any(|node| node_matches(node, target))
    }

    /// True when `value` appears anywhere along the chain: a string probe
    /// matches a link whose own message equals it; an error probe matches by
    /// identity, both on the cause spine (as [`is`](Self::is)) and on
    /// error-valued messages carried by links.
    pub fn contains<'a>(&self, value: impl Into<ChainValue<'a>>) -> bool {
        match value.into() {
            ChainValue::Message(message) => self
                .traced_nodes()
                .any(|err| matches!(err.message(), Some(Message::Text(text)) if text.as_str() == message)),
            ChainValue::Error(target) => {
                self.is(target)
                    || self.traced_nodes().any(|err| {
                        matches!(err.message(), Some(Message::Shared(annotation))
                            if annotation_matches(annotation, target))
                    })
            }
        }
    }

    /// Walks the chain for a node of concrete type `T` and returns it.
    ///
    /// Unlike `dyn Error::downcast_ref`, this searches every link, so it
    /// finds a typed cause buried under augmentation.
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.chain().find_map(|node| node.downcast_ref::<T>())
    }

    fn nodes(&self) -> impl Iterator<Item = Node<'_>> {
        let mut next = Some(Node::Traced(self));
        std::iter::from_fn(move || {
            let current = next?;
            next = match current {
                Node::Traced(err) => err.cause().map(|cause| match cause {
                    Cause::Traced(err) => Node::Traced(err),
                    Cause::Shared(shared) => Node::Shared(shared),
                }),
                Node::Shared(_) => None,
            };
            Some(current)
        })
    }

    fn traced_nodes(&self) -> impl Iterator<Item = &Error> {
        self.nodes().filter_map(|node| match node {
            Node::Traced(err) => Some(err),
            Node::Shared(_) => None,
        })
    }
}

fn node_matches(node: Node<'_>, target: ErrorTarget<'_>) -> bool {
    match (node, target) {
        (Node::Traced(node), ErrorTarget::Traced(target)) => node.ptr_eq(target),
        (Node::Shared(node), ErrorTarget::Shared(target)) => Arc::ptr_eq(node, target),
        // A traced error can sit behind a shared handle; compare records.
        (Node::Shared(node), ErrorTarget::Traced(target)) => node
            .downcast_ref::<Error>()
            .is_some_and(|err| err.ptr_eq(target)),
        (Node::Traced(node), ErrorTarget::Shared(target)) => target
            .downcast_ref::<Error>()
            .is_some_and(|err| err.ptr_eq(node)),
    }
}

fn annotation_matches(annotation: &SharedError, target: ErrorTarget<'_>) -> bool {
    match target {
        ErrorTarget::Shared(target) => Arc::ptr_eq(annotation, target),
        ErrorTarget::Traced(target) => annotation
            .downcast_ref::<Error>()
            .is_some_and(|err| err.ptr_eq(target)),
    }
}
