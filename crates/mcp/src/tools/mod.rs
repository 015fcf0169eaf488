pub mod whoami;
mod registry;

pub use whoami::WhoAmITool;
pub use registry::{
    json_schema_array, json_schema_object, json_schema_string, Tool, ToolRegistry,
};
