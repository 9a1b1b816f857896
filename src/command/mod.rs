pub mod publish;

pub use publish::{PackageContext, PackagePublish, PublishArgs};
