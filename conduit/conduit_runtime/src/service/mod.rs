//! Service variants.
//!
//! - [`LocalService`]: sessions created synchronously by a local factory
//! - [`TryParentService`] and [`ParentService`]: sessions requested from
//!   the parent
//! - [`AsyncService`], [`AsyncLocalService`], [`ChildService`] and
//!   [`RoutedService`]: sessions answered out of band

pub mod child;
pub mod local;
pub mod parent;

pub use child::{AsyncLocalService, AsyncService, ChildService, RoutedService};
pub use local::{LocalService, SingleSessionFactory, StaticSession};
pub use parent::{ParentService, TryParentService, DEFAULT_RETRY_LIMIT};
