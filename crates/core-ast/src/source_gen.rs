//! Rendering AST subtrees back to Verilog source.
//!
//! Used for insert payloads: when a script adds an item, the tree is
//! serialized here and the text lands in the rewritten file between
//! generated-code sentinels. Formatting leans on tab continuation the way
//! hand-written module bodies usually do; it does not try to reproduce any
//! original layout (inserted code never had one).

use crate::node::{Ast, NodeId, NodeKind, SelectKind};

pub fn to_source(ast: &Ast, id: NodeId) -> String {
    match ast.kind(id) {
        NodeKind::Port {
            dir,
            is_reg,
            range,
            ids,
            in_portlist,
        } => {
            let mut out = dir.keyword().to_string();
            if *is_reg {
                out.push_str(" reg");
            }
            out.push(' ');
            if let Some(r) = range {
                out.push_str(&to_source(ast, *r));
                out.push(' ');
            }
            out.push_str(&join(ast, ids, ",\n\t\t"));
            if !in_portlist {
                out.push(';');
            }
            out
        }
        NodeKind::Range { msb, lsb } => {
            format!("[{}:{}]", to_source(ast, *msb), to_source(ast, *lsb))
        }
        NodeKind::Parameter {
            kind,
            range,
            assigns,
        } => {
            let mut out = kind.keyword().to_string();
            out.push(' ');
            if let Some(r) = range {
                out.push_str(&to_source(ast, *r));
                out.push(' ');
            }
            out.push_str(&join(ast, assigns, ",\n\t\t"));
            out.push(';');
            out
        }
        NodeKind::Wire { range, ids } => {
            let mut out = String::from("wire ");
            if let Some(r) = range {
                out.push_str(&to_source(ast, *r));
                out.push(' ');
            }
            out.push_str(&join(ast, ids, ",\n\t\t"));
            out.push(';');
            out
        }
        NodeKind::Reg { range, ids } => {
            let mut out = String::from("reg ");
            if let Some(r) = range {
                out.push_str(&to_source(ast, *r));
                out.push(' ');
            }
            out.push_str(&join(ast, ids, ",\n\t\t"));
            out.push(';');
            out
        }
        NodeKind::MemReg { id, range } => {
            format!("{} {}", to_source(ast, *id), to_source(ast, *range))
        }
        NodeKind::ContAssigns { assigns } => {
            format!("assign {};", join(ast, assigns, ",\n\t\t"))
        }
        NodeKind::Always { statement } => format!("always {}", to_source(ast, *statement)),
        NodeKind::Edge { polarity, signal } => {
            format!("{} {}", polarity.keyword(), to_source(ast, *signal))
        }
        NodeKind::ModuleInsts {
            module_name,
            param_overrides,
            insts,
        } => {
            let mut out = to_source(ast, *module_name);
            out.push(' ');
            if !param_overrides.is_empty() {
                out.push_str("#(");
                out.push_str(&join(ast, param_overrides, ",\n\t\t\t"));
                out.push_str(")\n\t\t");
            }
            out.push_str(&join(ast, insts, ", "));
            out.push(';');
            out
        }
        NodeKind::ModuleInst {
            inst_name,
            connections,
        } => {
            format!(
                "{} ({})",
                to_source(ast, *inst_name),
                join(ast, connections, ",\n\t\t\t")
            )
        }
        NodeKind::Connection { port, expr } => {
            format!(".{}({})", to_source(ast, *port), to_source(ast, *expr))
        }
        NodeKind::Function {
            range,
            name,
            items,
            body,
        } => {
            let mut out = String::from("function ");
            if let Some(r) = range {
                out.push_str(&to_source(ast, *r));
                out.push(' ');
            }
            out.push_str(&to_source(ast, *name));
            out.push_str(";\n\t\t");
            for item in items {
                out.push_str(&to_source(ast, *item));
                out.push_str("\n\t\t");
            }
            out.push_str(&to_source(ast, *body));
            out.push_str("\n\tendfunction");
            out
        }
        NodeKind::Case { kind, expr, items } => {
            let mut out = format!("{}({})\n\t\t", kind.keyword(), to_source(ast, *expr));
            out.push_str(&join(ast, items, "\n\t\t"));
            out.push_str("\n\tendcase");
            out
        }
        NodeKind::CaseItem { exprs, statement } => {
            let mut out = if exprs.is_empty() {
                String::from("default : ")
            } else {
                format!("{} : ", join(ast, exprs, ", "))
            };
            match statement {
                Some(s) => out.push_str(&to_source(ast, *s)),
                None => out.push(';'),
            }
            out
        }
        NodeKind::Assign {
            lval,
            op,
            rval,
            is_statement,
        } => {
            let mut out = format!(
                "{} {} {}",
                to_source(ast, *lval),
                op.symbol(),
                to_source(ast, *rval)
            );
            if *is_statement {
                out.push(';');
            }
            out
        }
        NodeKind::At { sens, statement } => {
            let sens = if sens.is_empty() {
                String::from("*")
            } else {
                join(ast, sens, " or ")
            };
            format!("@({}) {}", sens, to_source(ast, *statement))
        }
        NodeKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let mut out = format!(
                "if ( {} )\n\t\t\t{}",
                to_source(ast, *cond),
                opt_statement(ast, *then_branch)
            );
            if let Some(e) = else_branch {
                out.push_str(&format!("\n\t\telse\n\t\t\t{}", to_source(ast, *e)));
            }
            out
        }
        NodeKind::For {
            init,
            cond,
            step,
            body,
        }
        | NodeKind::GenerateFor {
            init,
            cond,
            step,
            body,
        } => {
            format!(
                "for ({}; {}; {})\n\t\t\t{}",
                to_source(ast, *init),
                to_source(ast, *cond),
                to_source(ast, *step),
                to_source(ast, *body)
            )
        }
        NodeKind::While { cond, body } => {
            format!(
                "while ( {} )\n\t\t\t{}",
                to_source(ast, *cond),
                to_source(ast, *body)
            )
        }
        NodeKind::Block { name, statements } => {
            let mut out = String::from("begin");
            if let Some(name) = name {
                out.push_str(" : ");
                out.push_str(name);
            }
            out.push_str("\n\t\t");
            out.push_str(&join(ast, statements, "\n\t\t"));
            out.push_str("\n\tend");
            out
        }
        NodeKind::TaskCall { task, args } => {
            if args.is_empty() {
                format!("{};", to_source(ast, *task))
            } else {
                format!("{}({});", to_source(ast, *task), join(ast, args, ", "))
            }
        }
        NodeKind::Generate { items } => {
            format!("generate\n\t{}\n\tendgenerate", join(ast, items, "\n\t"))
        }
        NodeKind::GenerateBlock { name, items } => {
            let mut out = String::from("begin");
            if let Some(name) = name {
                out.push_str(" : ");
                out.push_str(name);
            }
            out.push_str("\n\t\t");
            out.push_str(&join(ast, items, "\n\t\t"));
            out.push_str("\n\tend");
            out
        }
        NodeKind::GenerateIf {
            cond,
            then_branch,
            else_branch,
        } => {
            let mut out = format!(
                "if ( {} )\n\t\t{}",
                to_source(ast, *cond),
                opt_statement(ast, *then_branch)
            );
            if let Some(e) = else_branch {
                out.push_str(&format!("\n\telse\n\t\t{}", to_source(ast, *e)));
            }
            out
        }
        NodeKind::GenerateCase { expr, items } => {
            format!(
                "case({})\n\t\t{}\n\tendcase",
                to_source(ast, *expr),
                join(ast, items, "\n\t\t")
            )
        }
        NodeKind::GenerateCaseItem { exprs, item } => {
            let mut out = if exprs.is_empty() {
                String::from("default : ")
            } else {
                format!("{} : ", join(ast, exprs, ", "))
            };
            match item {
                Some(i) => out.push_str(&to_source(ast, *i)),
                None => out.push(';'),
            }
            out
        }
        NodeKind::Genvars { ids } => format!("genvar {};", join(ast, ids, ", ")),
        NodeKind::Metav { source } => format!("/*metav\n{source}\n*/"),
        NodeKind::Id { name } => name.clone(),
        NodeKind::PartSelect { base, select, a, b } => {
            let base = to_source(ast, *base);
            match select {
                SelectKind::Single => format!("{base}[{}]", to_source(ast, *a)),
                SelectKind::Range => format!(
                    "{base}[{}:{}]",
                    to_source(ast, *a),
                    to_source(ast, *b.as_ref().expect("range select has lsb"))
                ),
                SelectKind::Plus => format!(
                    "{base}[{}+:{}]",
                    to_source(ast, *a),
                    to_source(ast, *b.as_ref().expect("plus select has width"))
                ),
            }
        }
        NodeKind::BinaryOp { op, lhs, rhs } => {
            format!(
                "({} {} {})",
                to_source(ast, *lhs),
                op.symbol(),
                to_source(ast, *rhs)
            )
        }
        NodeKind::UnaryOp { op, expr } => format!("({}{})", op.symbol(), to_source(ast, *expr)),
        NodeKind::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            format!(
                "({}) ? ({})\n\t\t: ({})",
                to_source(ast, *cond),
                to_source(ast, *then_expr),
                to_source(ast, *else_expr)
            )
        }
        NodeKind::Repetition { count, concat } => {
            format!("{{{}{}}}", to_source(ast, *count), to_source(ast, *concat))
        }
        NodeKind::Concatenation { exprs } => format!("{{{}}}", join(ast, exprs, ", ")),
        NodeKind::Number { value } => value.orig.clone(),
        NodeKind::Str { value } => value.clone(),
        NodeKind::Real { value } => value.clone(),
    }
}

fn opt_statement(ast: &Ast, id: Option<NodeId>) -> String {
    match id {
        Some(id) => to_source(ast, id),
        None => String::from(";"),
    }
}

fn join(ast: &Ast, ids: &[NodeId], sep: &str) -> String {
    ids.iter()
        .map(|&id| to_source(ast, id))
        .collect::<Vec<_>>()
        .join(sep)
}
