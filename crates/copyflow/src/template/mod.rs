//! Workflow-definition template expansion.
//!
//! An annotated definition is a tree of mappings, sequences, strings,
//! scalars, task handler references and replication annotations. Expansion
//! turns it into a concrete tree with no annotations left:
//!
//! - a replication instantiates its subtree `pool_size` times, replacing its
//!   token with the copy's 0-based index in every string and mapping key
//!   below it, nested replications included
//! - tokens are applied in the order their replications enclose each other,
//!   outermost first
//! - a handler reached inside one or more replications is bound to the
//!   branch-index tuple of its copy; handlers outside any replication pass
//!   through untouched
//!
//! Expansion is pure: the input is never mutated and a failure produces no
//! output at all.

pub mod bound;
pub mod error;
pub mod expand;
pub mod node;

pub use bound::BoundHandler;
pub use error::ExpansionError;
pub use expand::{expand, expand_in, SubstitutionContext};
pub use node::{
    AnnotatedNode, ConcreteNode, Replication, Scalar, HANDLER_ANNOTATION, REPLICATE_ANNOTATION,
};
