//! Factory surface for constructing new nodes from scripts.
//!
//! Nodes built here never came from a source file, so they carry a synthetic
//! range on the pseudo-file `<generated>`; they only become real bytes when
//! an `add_item` edit serializes them into an output file.

use core_lex::VerilogNumber;
use core_source::{Frame, Pos, SourceRange};
use num_bigint::BigUint;
use num_traits::Zero;

use crate::node::{
    AssignOp, Ast, BinaryOpKind, CaseKind, NodeId, NodeKind, ParamKind, Polarity, PortDir,
    SelectKind, UnaryOpKind,
};

fn synthetic_range() -> SourceRange {
    let pos = Pos::in_file(Frame::file("<generated>"));
    SourceRange::new(pos.clone(), pos)
}

/// Node factory over a module's arena.
pub struct Builder<'a> {
    ast: &'a mut Ast,
}

impl<'a> Builder<'a> {
    pub(crate) fn new(ast: &'a mut Ast) -> Self {
        Self { ast }
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.ast.alloc(kind, synthetic_range())
    }

    fn alloc_with_children(&mut self, kind: NodeKind, children: Vec<NodeId>) -> NodeId {
        let id = self.alloc(kind);
        self.ast.adopt(id, children);
        id
    }

    pub fn id(&mut self, name: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Id { name: name.into() })
    }

    /// An unsized decimal literal.
    pub fn number(&mut self, value: u64) -> NodeId {
        self.alloc(NodeKind::Number {
            value: VerilogNumber {
                size: 32,
                value: BigUint::from(value),
                xmask: BigUint::zero(),
                zmask: BigUint::zero(),
                orig: value.to_string(),
            },
        })
    }

    /// A literal in source form, e.g. `8'hFF`.
    pub fn sized_number(&mut self, text: &str) -> Result<NodeId, core_lex::NumberError> {
        let value = VerilogNumber::parse(text)?;
        Ok(self.alloc(NodeKind::Number { value }))
    }

    pub fn string(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Str { value: text.into() })
    }

    pub fn range(&mut self, msb: NodeId, lsb: NodeId) -> NodeId {
        self.alloc_with_children(NodeKind::Range { msb, lsb }, vec![msb, lsb])
    }

    pub fn wire(&mut self, range: Option<NodeId>, ids: Vec<NodeId>) -> NodeId {
        let children: Vec<_> = range.iter().copied().chain(ids.iter().copied()).collect();
        self.alloc_with_children(NodeKind::Wire { range, ids }, children)
    }

    pub fn reg(&mut self, range: Option<NodeId>, ids: Vec<NodeId>) -> NodeId {
        let children: Vec<_> = range.iter().copied().chain(ids.iter().copied()).collect();
        self.alloc_with_children(NodeKind::Reg { range, ids }, children)
    }

    pub fn mem_reg(&mut self, id: NodeId, range: NodeId) -> NodeId {
        self.alloc_with_children(NodeKind::MemReg { id, range }, vec![id, range])
    }

    pub fn port(
        &mut self,
        dir: PortDir,
        is_reg: bool,
        range: Option<NodeId>,
        ids: Vec<NodeId>,
    ) -> NodeId {
        let children: Vec<_> = range.iter().copied().chain(ids.iter().copied()).collect();
        self.alloc_with_children(
            NodeKind::Port {
                dir,
                is_reg,
                range,
                ids,
                in_portlist: false,
            },
            children,
        )
    }

    pub fn parameter(
        &mut self,
        kind: ParamKind,
        range: Option<NodeId>,
        assigns: Vec<NodeId>,
    ) -> NodeId {
        let children: Vec<_> = range.iter().copied().chain(assigns.iter().copied()).collect();
        self.alloc_with_children(
            NodeKind::Parameter {
                kind,
                range,
                assigns,
            },
            children,
        )
    }

    pub fn assign(&mut self, lval: NodeId, op: AssignOp, rval: NodeId) -> NodeId {
        self.alloc_with_children(
            NodeKind::Assign {
                lval,
                op,
                rval,
                is_statement: false,
            },
            vec![lval, rval],
        )
    }

    pub fn statement_assign(&mut self, lval: NodeId, op: AssignOp, rval: NodeId) -> NodeId {
        self.alloc_with_children(
            NodeKind::Assign {
                lval,
                op,
                rval,
                is_statement: true,
            },
            vec![lval, rval],
        )
    }

    pub fn cont_assigns(&mut self, assigns: Vec<NodeId>) -> NodeId {
        let children = assigns.clone();
        self.alloc_with_children(NodeKind::ContAssigns { assigns }, children)
    }

    pub fn always(&mut self, statement: NodeId) -> NodeId {
        self.alloc_with_children(NodeKind::Always { statement }, vec![statement])
    }

    pub fn at(&mut self, sens: Vec<NodeId>, statement: NodeId) -> NodeId {
        let children: Vec<_> = sens.iter().copied().chain([statement]).collect();
        self.alloc_with_children(NodeKind::At { sens, statement }, children)
    }

    pub fn edge(&mut self, polarity: Polarity, signal: NodeId) -> NodeId {
        self.alloc_with_children(NodeKind::Edge { polarity, signal }, vec![signal])
    }

    pub fn if_(
        &mut self,
        cond: NodeId,
        then_branch: Option<NodeId>,
        else_branch: Option<NodeId>,
    ) -> NodeId {
        let children: Vec<_> = [Some(cond), then_branch, else_branch]
            .into_iter()
            .flatten()
            .collect();
        self.alloc_with_children(
            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            },
            children,
        )
    }

    pub fn block(&mut self, name: Option<String>, statements: Vec<NodeId>) -> NodeId {
        let children = statements.clone();
        self.alloc_with_children(NodeKind::Block { name, statements }, children)
    }

    pub fn case(&mut self, kind: CaseKind, expr: NodeId, items: Vec<NodeId>) -> NodeId {
        let children: Vec<_> = [expr].into_iter().chain(items.iter().copied()).collect();
        self.alloc_with_children(NodeKind::Case { kind, expr, items }, children)
    }

    pub fn case_item(&mut self, exprs: Vec<NodeId>, statement: Option<NodeId>) -> NodeId {
        let children: Vec<_> = exprs.iter().copied().chain(statement).collect();
        self.alloc_with_children(NodeKind::CaseItem { exprs, statement }, children)
    }

    pub fn binary(&mut self, op: BinaryOpKind, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.alloc_with_children(NodeKind::BinaryOp { op, lhs, rhs }, vec![lhs, rhs])
    }

    pub fn unary(&mut self, op: UnaryOpKind, expr: NodeId) -> NodeId {
        self.alloc_with_children(NodeKind::UnaryOp { op, expr }, vec![expr])
    }

    pub fn ternary(&mut self, cond: NodeId, then_expr: NodeId, else_expr: NodeId) -> NodeId {
        self.alloc_with_children(
            NodeKind::Ternary {
                cond,
                then_expr,
                else_expr,
            },
            vec![cond, then_expr, else_expr],
        )
    }

    pub fn concatenation(&mut self, exprs: Vec<NodeId>) -> NodeId {
        let children = exprs.clone();
        self.alloc_with_children(NodeKind::Concatenation { exprs }, children)
    }

    pub fn repetition(&mut self, count: NodeId, concat: NodeId) -> NodeId {
        self.alloc_with_children(NodeKind::Repetition { count, concat }, vec![count, concat])
    }

    pub fn part_select(
        &mut self,
        base: NodeId,
        select: SelectKind,
        a: NodeId,
        b: Option<NodeId>,
    ) -> NodeId {
        let children: Vec<_> = [base, a].into_iter().chain(b).collect();
        self.alloc_with_children(NodeKind::PartSelect { base, select, a, b }, children)
    }

    pub fn module_insts(
        &mut self,
        module_name: NodeId,
        param_overrides: Vec<NodeId>,
        insts: Vec<NodeId>,
    ) -> NodeId {
        let children: Vec<_> = [module_name]
            .into_iter()
            .chain(param_overrides.iter().copied())
            .chain(insts.iter().copied())
            .collect();
        self.alloc_with_children(
            NodeKind::ModuleInsts {
                module_name,
                param_overrides,
                insts,
            },
            children,
        )
    }

    pub fn module_inst(&mut self, inst_name: NodeId, connections: Vec<NodeId>) -> NodeId {
        let children: Vec<_> = [inst_name]
            .into_iter()
            .chain(connections.iter().copied())
            .collect();
        self.alloc_with_children(
            NodeKind::ModuleInst {
                inst_name,
                connections,
            },
            children,
        )
    }

    pub fn connection(&mut self, port: NodeId, expr: NodeId) -> NodeId {
        self.alloc_with_children(NodeKind::Connection { port, expr }, vec![port, expr])
    }

    pub fn task_call(&mut self, task: NodeId, args: Vec<NodeId>) -> NodeId {
        let children: Vec<_> = [task].into_iter().chain(args.iter().copied()).collect();
        self.alloc_with_children(NodeKind::TaskCall { task, args }, children)
    }

    pub fn genvars(&mut self, ids: Vec<NodeId>) -> NodeId {
        let children = ids.clone();
        self.alloc_with_children(NodeKind::Genvars { ids }, children)
    }
}
