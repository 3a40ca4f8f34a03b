pub mod common;
pub mod markdown;
pub mod thread_widget;

pub use markdown::{MarkdownRenderer, RenderHandle, TerminalMarkdownRenderer};
pub use thread_widget::{ThreadEvent, ThreadWidget};
