pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_plan_file, parse_plan_str};
pub use types::TestPlan;
pub use validator::{unsupported_steps, validate_plan, validate_steps};
