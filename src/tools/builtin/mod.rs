pub mod calculator;
pub mod current_time;

use std::sync::Arc;

use super::registry::ToolRegistry;
use super::types::Tool;

pub fn register_all(registry: &mut ToolRegistry) {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(calculator::CalculatorTool),
        Arc::new(current_time::CurrentTimeTool),
    ];
    for tool in tools {
        registry.register(tool);
    }
}
