pub mod messaging;
pub mod timeline;

pub use messaging::MessagingService;
pub use timeline::{
    MemoryDirectory, SessionValidator, TimelineClient, TimelineDirectory, TimelineParties,
    TimelineRef,
};
