//! Human-readable IR dump

use crate::ir::*;
use crate::program::Program;
use std::fmt::Write;
use vlower_types::DeclId;

/// Render every root declaration and its members.
pub fn dump_program(program: &Program) -> String {
    let mut out = String::new();
    for root in program.roots() {
        dump_decl(program, root, 0, &mut out);
    }
    out
}

pub fn dump_decl(program: &Program, id: DeclId, depth: usize, out: &mut String) {
    let decl = program.get(id);
    let pad = "  ".repeat(depth);
    let origin = match &decl.origin {
        Origin::Defined => String::new(),
        other => format!(" /* {} */", origin_name(other)),
    };
    match &decl.kind {
        DeclKind::Class(class) => {
            let keyword = if class.is_interface { "interface" } else { "class" };
            let repr = match class.value_repr {
                Some(ValueRepr::Inline) => " [inline]",
                Some(ValueRepr::MultiField) => " [multi-field]",
                None => "",
            };
            let tps = if class.type_params.is_empty() {
                String::new()
            } else {
                format!("<{}>", class.type_params.join(", "))
            };
            let _ = writeln!(out, "{}{} {}{}{}{} {{", pad, keyword, decl.name, tps, repr, origin);
            for member in &class.members {
                dump_decl(program, *member, depth + 1, out);
            }
            let _ = writeln!(out, "{}}}", pad);
        }
        DeclKind::Function(func) => {
            let params: Vec<String> =
                func.params.iter().map(|p| format!("{}: {}", p.name, p.ty)).collect();
            let keyword = match func.kind {
                FunctionKind::Constructor { is_primary: true } => "primary constructor",
                FunctionKind::Constructor { is_primary: false } => "constructor",
                FunctionKind::Simple if func.has_dispatch_receiver => "fun",
                FunctionKind::Simple => "static fun",
            };
            let fake = if func.is_fake_override { " fake_override" } else { "" };
            let head = format!(
                "{}{} {}({}): {}{}{}",
                pad,
                keyword,
                decl.name,
                params.join(", "),
                func.return_type,
                fake,
                origin
            );
            let names: Vec<&str> = func.params.iter().map(|p| p.name.as_str()).collect();
            match &func.body {
                None => {
                    let _ = writeln!(out, "{}", head);
                }
                Some(Body::Expr(expr)) => {
                    let _ = writeln!(out, "{} = {}", head, render_expr(program, expr, &names));
                }
                Some(Body::Block(stmts)) => {
                    let _ = writeln!(out, "{} {{", head);
                    for stmt in stmts {
                        let _ = writeln!(out, "{}  {}", pad, render_stmt(program, stmt, &names));
                    }
                    let _ = writeln!(out, "{}}}", pad);
                }
            }
        }
        DeclKind::Field(field) => {
            let kw = if field.is_static { "static field" } else { "field" };
            match &field.initializer {
                Some(init) => {
                    let _ = writeln!(
                        out,
                        "{}{} {}: {} = {}{}",
                        pad,
                        kw,
                        decl.name,
                        field.ty,
                        render_expr(program, init, &[]),
                        origin
                    );
                }
                None => {
                    let _ = writeln!(out, "{}{} {}: {}{}", pad, kw, decl.name, field.ty, origin);
                }
            }
        }
        DeclKind::Property(property) => {
            let _ = writeln!(out, "{}property {}: {}{}", pad, decl.name, property.ty, origin);
        }
        DeclKind::Initializer(init) => {
            let _ = writeln!(out, "{}init {{", pad);
            for stmt in &init.body {
                let _ = writeln!(out, "{}  {}", pad, render_stmt(program, stmt, &[]));
            }
            let _ = writeln!(out, "{}}}", pad);
        }
    }
}

fn origin_name(origin: &Origin) -> String {
    match origin {
        Origin::Defined => "defined".into(),
        Origin::FakeOverride => "fake override".into(),
        Origin::DefaultPropertyAccessor => "default accessor".into(),
        Origin::DelegatedPropertyAccessor => "delegated accessor".into(),
        Origin::BuiltinsStub => "builtins stub".into(),
        Origin::SyntheticSamImplementation => "sam implementation".into(),
        Origin::Synthetic(name) => format!("synthetic {}", name),
        Origin::StaticValueClassReplacement => "static replacement".into(),
        Origin::MethodValueClassReplacement => "method replacement".into(),
        Origin::MultiFieldValueClassMember => "mfvc member".into(),
    }
}

pub fn render_stmt(program: &Program, stmt: &Stmt, params: &[&str]) -> String {
    match stmt {
        Stmt::Let { id, name, ty, init } => format!(
            "val {}#{}: {} = {}",
            name,
            id,
            ty,
            render_expr(program, init, params)
        ),
        Stmt::Expr { expr } => render_expr(program, expr, params),
        Stmt::Return { value: Some(value) } => {
            format!("return {}", render_expr(program, value, params))
        }
        Stmt::Return { value: None } => "return".to_string(),
    }
}

pub fn render_expr(program: &Program, expr: &Expr, params: &[&str]) -> String {
    let name = |id: DeclId| program.get(id).name.clone();
    let list = |exprs: &[Expr]| {
        exprs
            .iter()
            .map(|e| render_expr(program, e, params))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let value = |v: &ValueRef| match v {
        ValueRef::This => "this".to_string(),
        ValueRef::Param(i) => params.get(*i).map_or_else(|| format!("${}", i), |n| n.to_string()),
        ValueRef::Local(id) => format!("%{}", id),
    };

    match expr {
        Expr::Const { value } => match value {
            Literal::Unit => "Unit".into(),
            Literal::Null => "null".into(),
            Literal::Bool(b) => b.to_string(),
            Literal::Int(i) => i.to_string(),
            Literal::Double(d) => format!("{:?}", d),
            Literal::String(s) => format!("{:?}", s),
        },
        Expr::Get { value: v } => value(v),
        Expr::Set { target, value: v } => {
            format!("{} = {}", value(target), render_expr(program, v, params))
        }
        Expr::GetField { field, receiver } => match receiver {
            Some(r) => format!("{}.{}", render_expr(program, r, params), name(*field)),
            None => name(*field),
        },
        Expr::SetField { field, receiver, value: v } => {
            let target = match receiver {
                Some(r) => format!("{}.{}", render_expr(program, r, params), name(*field)),
                None => name(*field),
            };
            format!("{} = {}", target, render_expr(program, v, params))
        }
        Expr::Call { function, receiver, args, .. } => match receiver {
            Some(r) => format!(
                "{}.{}({})",
                render_expr(program, r, params),
                name(*function),
                list(args)
            ),
            None => format!("{}({})", name(*function), list(args)),
        },
        Expr::ConstructorCall { constructor, args, .. } => {
            let class = program
                .parent_class(*constructor)
                .map_or_else(|| name(*constructor), name);
            format!("new {}({})", class, list(args))
        }
        Expr::FunctionReference { function } => format!("::{}", name(*function)),
        Expr::Equals { left, right } => format!(
            "({} == {})",
            render_expr(program, left, params),
            render_expr(program, right, params)
        ),
        Expr::AndAnd { left, right } => format!(
            "({} && {})",
            render_expr(program, left, params),
            render_expr(program, right, params)
        ),
        Expr::Intrinsic { op, args } => {
            let op = match op {
                Intrinsic::Add => "add",
                Intrinsic::Sub => "sub",
                Intrinsic::Concat => "concat",
                Intrinsic::Print => "print",
            };
            format!("@{}({})", op, list(args))
        }
    }
}
