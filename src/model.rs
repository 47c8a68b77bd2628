//! The three spec-level entities the rule engine validates against: the
//! OCF Container Model, the OPF Package Model, and the Navigation Document
//! Model. Built once, in order, and read-only thereafter (§3 "Lifecycle").

pub(crate) mod attr;
pub(crate) mod container;
pub(crate) mod nav;
pub(crate) mod package;

pub(crate) use attr::AttrValue;
pub(crate) use container::ContainerModel;
pub(crate) use nav::NavModel;
pub(crate) use package::PackageModel;
