//! Explain command - explain diagnostic codes

use anyhow::{anyhow, Result};
use clap::Args;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct ExplainArgs {
    /// Diagnostic code to explain (e.g., U001, W001)
    pub code: String,
}

struct CodeExplanation {
    code: &'static str,
    title: &'static str,
    description: &'static str,
    example: Option<&'static str>,
    suggestion: Option<&'static str>,
    related: &'static [&'static str],
}

const EXPLANATIONS: &[CodeExplanation] = &[
    CodeExplanation {
        code: "P001",
        title: "Malformed Program",
        description: "The input program refers to a declaration that does not exist, uses a declaration of the wrong kind, or declares a multi-field value class that contains itself.",
        example: Some("value class Node(val value: Int, val next: Node)  // infinitely many leaves"),
        suggestion: Some("Regenerate the program from the front end; this is not a lowering limitation."),
        related: &["I001"],
    },
    CodeExplanation {
        code: "U001",
        title: "Write to Flattened Field",
        description: "Fields of a multi-field value class are replaced by their leaves. After construction the leaves are immutable, so a write to the original field has no single place to go.",
        example: Some("p.x = 1  // p: Point"),
        suggestion: Some("Construct a new value instead: Point(1, p.y)."),
        related: &["U005"],
    },
    CodeExplanation {
        code: "U002",
        title: "Reference to Replaced Function",
        description: "The function takes a multi-field value class parameter (or belongs to one) and was replaced by a version taking leaves. A function reference would still expect the boxed signature.",
        example: Some("val f = ::length  // fun length(p: Point)"),
        suggestion: Some("Wrap the call in a lambda: { p: Point -> length(p) }."),
        related: &["U003"],
    },
    CodeExplanation {
        code: "U003",
        title: "Aggregate Cannot Be Split",
        description: "A multi-field value class value must be split into leaves here, but the expression is neither a variable, a field read, nor a constructor call. Splitting it would evaluate it once per leaf.",
        example: Some("length(makePoint())"),
        suggestion: Some("Bind the value to a local first: val p = makePoint(); length(p)."),
        related: &["U002"],
    },
    CodeExplanation {
        code: "U004",
        title: "Unsupported Initializer",
        description: "Initializer blocks of a multi-field value class are moved into a static constructor that receives the leaves. Statements that use `this` other than to read a field, return early, or assign constructor parameters cannot be moved.",
        example: Some("init { register(this) }"),
        suggestion: Some("Move the logic into a function that takes the fields it needs."),
        related: &["U005"],
    },
    CodeExplanation {
        code: "U005",
        title: "Unsupported Feature",
        description: "The construct is not supported on multi-field value classes: secondary constructors, primary constructors whose parameters do not map one to one onto fields, or assignment to a parameter of value class type.",
        example: Some("constructor(x: Int) : this(x, x)"),
        suggestion: Some("Use a factory function instead of a secondary constructor."),
        related: &["U004"],
    },
    CodeExplanation {
        code: "W001",
        title: "User-defined equals Ignored",
        description: "`==` on a multi-field value class compares leaves with the generated equality. A user-defined equals is not called.",
        example: Some("value class Point(val x: Int, val y: Int) { override fun equals(other: Any?) = false }"),
        suggestion: Some("Remove the override, or compare through an explicit function."),
        related: &[],
    },
    CodeExplanation {
        code: "I001",
        title: "Internal Error",
        description: "The lowering detected an inconsistency in its own state. This is a compiler bug.",
        example: None,
        suggestion: Some("Report the program that triggers it."),
        related: &["P001"],
    },
];

pub fn run(args: ExplainArgs, format: OutputFormat, use_color: bool) -> Result<()> {
    let code = args.code.to_uppercase();

    let explanation = EXPLANATIONS
        .iter()
        .find(|e| e.code == code)
        .ok_or_else(|| anyhow!("Unknown diagnostic code: {}", code))?;

    match format {
        OutputFormat::Text => {
            if use_color {
                println!(
                    "\n{}: {}\n{}",
                    console::style(&code).bold().cyan(),
                    console::style(explanation.title).bold(),
                    "=".repeat(code.len() + explanation.title.len() + 2)
                );
            } else {
                println!(
                    "\n{}: {}\n{}",
                    code,
                    explanation.title,
                    "=".repeat(code.len() + explanation.title.len() + 2)
                );
            }

            println!("\n{}\n", explanation.description);

            if let Some(example) = explanation.example {
                if use_color {
                    println!("{}:", console::style("Example").bold());
                } else {
                    println!("Example:");
                }
                println!("  {}\n", example);
            }

            if let Some(suggestion) = explanation.suggestion {
                if use_color {
                    println!("{}:", console::style("Suggestion").bold().green());
                } else {
                    println!("Suggestion:");
                }
                println!("  {}\n", suggestion);
            }

            if !explanation.related.is_empty() {
                println!("Related: {}", explanation.related.join(", "));
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "code": explanation.code,
                "title": explanation.title,
                "description": explanation.description,
                "example": explanation.example,
                "suggestion": explanation.suggestion,
                "related": explanation.related,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vlower_diagnostics::DiagnosticCode;

    #[test]
    fn test_every_code_is_explained() {
        for code in DiagnosticCode::ALL {
            assert!(
                EXPLANATIONS.iter().any(|e| e.code == code.as_str()),
                "missing explanation for {}",
                code
            );
        }
        assert_eq!(EXPLANATIONS.len(), DiagnosticCode::ALL.len());
    }
}
