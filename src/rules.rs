//! The rule catalogue (§4.6-§4.9), one module per phase. Every rule is a
//! pure function over the already-built models and an append-only
//! [`Report`](crate::report::Report) — grounded on §5's "rules within a
//! phase are pure functions ... the implementation may run them on one
//! task", so each phase's `run` simply calls its rule functions in a fixed,
//! documented order.

pub(crate) mod nav;
pub(crate) mod ocf;
pub(crate) mod opf;
pub(crate) mod xref;
