//! 工具箱：Tool trait 与回合级 ToolSet、工具工厂，以及各检索 / 对话工具

pub mod api_search;
pub mod chat;
pub mod echo;
pub mod factory;
pub mod index_search;
pub mod registry;

pub use api_search::{reduce_openapi_spec, ApiSearchTool, ApiSpecSource, ReducedSpec};
pub use chat::ChatTool;
pub use echo::EchoTool;
pub use factory::{ConfiguredToolFactory, ToolFactory};
pub use index_search::{IndexSearchTool, SearchService};
pub use registry::{Tool, ToolDescriptor, ToolSet};
