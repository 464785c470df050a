use async_trait::async_trait;
use serde_json::{json, Map, Value};
use strum_macros::{Display, EnumString};

use crate::errors::{ToolError, ToolResult};
use crate::models::tool::Tool;
use crate::toolkit::Invocable;

pub const CALCULATOR_TOOL_NAME: &str = "CalculatorTool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Performs basic arithmetic on two operands
pub struct CalculatorTool {
    tool: Tool,
}

impl CalculatorTool {
    pub fn new() -> Self {
        Self {
            tool: Tool::new(
                CALCULATOR_TOOL_NAME,
                "Performs basic arithmetic operations.",
                json!({
                    "type": "object",
                    "properties": {
                        "operation": {
                            "type": "string",
                            "description": "The arithmetic operation to perform ('add', 'subtract', 'multiply', 'divide').",
                            "enum": ["add", "subtract", "multiply", "divide"]
                        },
                        "x": {
                            "type": "number",
                            "description": "The left operand for the operation."
                        },
                        "y": {
                            "type": "number",
                            "description": "The right operand for the operation."
                        }
                    },
                    "required": ["operation", "x", "y"]
                }),
            ),
        }
    }

    fn operand(arguments: &Map<String, Value>, key: &str) -> ToolResult<f64> {
        arguments
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| ToolError::InvalidParameters(format!("'{}' must be a number", key)))
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Invocable for CalculatorTool {
    fn tool(&self) -> &Tool {
        &self.tool
    }

    async fn call(&self, arguments: Map<String, Value>) -> ToolResult<Value> {
        let operation: Operation = arguments
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidParameters("'operation' is required".into()))?
            .parse()
            .map_err(|_| ToolError::InvalidParameters("Unknown operation.".into()))?;
        let x = Self::operand(&arguments, "x")?;
        let y = Self::operand(&arguments, "y")?;

        if operation == Operation::Divide && y == 0.0 {
            return Err(ToolError::ExecutionError("Division by zero.".into()));
        }

        // integer operands keep integer results unless the operation overflows or divides
        let integer = |key: &str| arguments.get(key).and_then(Value::as_i64);
        let exact = match (integer("x"), integer("y")) {
            (Some(x), Some(y)) => match operation {
                Operation::Add => x.checked_add(y),
                Operation::Subtract => x.checked_sub(y),
                Operation::Multiply => x.checked_mul(y),
                Operation::Divide => None,
            },
            _ => None,
        };

        let calculated_result = match exact {
            Some(result) => result.to_string(),
            None => {
                let result = match operation {
                    Operation::Add => x + y,
                    Operation::Subtract => x - y,
                    Operation::Multiply => x * y,
                    Operation::Divide => x / y,
                };
                format!("{:?}", result)
            }
        };

        Ok(json!({
            "operation": operation.to_string(),
            "calculated_result": calculated_result,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_operations() -> anyhow::Result<()> {
        let calculator = CalculatorTool::new();

        let sum = calculator
            .call(args(json!({"operation": "add", "x": 512, "y": 671})))
            .await?;
        assert_eq!(
            sum,
            json!({"operation": "add", "calculated_result": "1183"})
        );

        let difference = calculator
            .call(args(json!({"operation": "subtract", "x": 20, "y": 50})))
            .await?;
        assert_eq!(difference["calculated_result"], json!("-30"));

        let float_sum = calculator
            .call(args(json!({"operation": "add", "x": 512.0, "y": 671})))
            .await?;
        assert_eq!(float_sum["calculated_result"], json!("1183.0"));

        let exact_quotient = calculator
            .call(args(json!({"operation": "divide", "x": 500, "y": 4})))
            .await?;
        assert_eq!(exact_quotient["calculated_result"], json!("125.0"));

        let quotient = calculator
            .call(args(json!({"operation": "divide", "x": 7, "y": 2})))
            .await?;
        assert_eq!(quotient["calculated_result"], json!("3.5"));

        let product = calculator
            .call(args(json!({"operation": "multiply", "x": -3, "y": 4.5})))
            .await?;
        assert_eq!(product["calculated_result"], json!("-13.5"));
        Ok(())
    }

    #[tokio::test]
    async fn test_integer_overflow_falls_back_to_float() -> anyhow::Result<()> {
        let calculator = CalculatorTool::new();

        let product = calculator
            .call(args(json!({"operation": "multiply", "x": i64::MAX, "y": 2})))
            .await?;
        assert_eq!(
            product["calculated_result"],
            json!(format!("{:?}", i64::MAX as f64 * 2.0))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_calls() {
        let calculator = CalculatorTool::new();

        assert_eq!(
            calculator
                .call(args(json!({"operation": "divide", "x": 1, "y": 0})))
                .await,
            Err(ToolError::ExecutionError("Division by zero.".into()))
        );
        assert_eq!(
            calculator
                .call(args(json!({"operation": "modulo", "x": 1, "y": 2})))
                .await,
            Err(ToolError::InvalidParameters("Unknown operation.".into()))
        );
        assert!(matches!(
            calculator
                .call(args(json!({"operation": "add", "x": "one", "y": 2})))
                .await,
            Err(ToolError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_declaration() {
        let calculator = CalculatorTool::default();
        assert_eq!(calculator.tool().name, CALCULATOR_TOOL_NAME);
        assert_eq!(
            calculator.tool().input_schema["required"],
            json!(["operation", "x", "y"])
        );
    }
}
