//! Arena-allocated AST nodes.
//!
//! Nodes live in a flat [`Ast`] arena owned by their module; structure is
//! expressed through [`NodeId`] links. The shared attributes every construct
//! has (source range and parent) sit on [`Node`] itself, outside the
//! per-kind payload, and parent links are plain ids, so ownership stays
//! strictly top-down while back-references remain cheap.

use core_lex::VerilogNumber;
use core_source::{Pos, SourceRange};

/// Index of a node within its module's [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDir {
    Input,
    Output,
    Inout,
}

impl PortDir {
    pub fn keyword(self) -> &'static str {
        match self {
            PortDir::Input => "input",
            PortDir::Output => "output",
            PortDir::Inout => "inout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Parameter,
    Localparam,
}

impl ParamKind {
    pub fn keyword(self) -> &'static str {
        match self {
            ParamKind::Parameter => "parameter",
            ParamKind::Localparam => "localparam",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseKind {
    Case,
    Casez,
    Casex,
}

impl CaseKind {
    pub fn keyword(self) -> &'static str {
        match self {
            CaseKind::Case => "case",
            CaseKind::Casez => "casez",
            CaseKind::Casex => "casex",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Posedge,
    Negedge,
}

impl Polarity {
    pub fn keyword(self) -> &'static str {
        match self {
            Polarity::Posedge => "posedge",
            Polarity::Negedge => "negedge",
        }
    }
}

/// `=` vs `<=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Blocking,
    NonBlocking,
}

impl AssignOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Blocking => "=",
            AssignOp::NonBlocking => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    LogicalNot,
    BitwiseNot,
    Negate,
    Identity,
    ReduceOr,
    ReduceAnd,
    ReduceXor,
}

impl UnaryOpKind {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOpKind::LogicalNot => "!",
            UnaryOpKind::BitwiseNot => "~",
            UnaryOpKind::Negate => "-",
            UnaryOpKind::Identity => "+",
            UnaryOpKind::ReduceOr => "|",
            UnaryOpKind::ReduceAnd => "&",
            UnaryOpKind::ReduceXor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Eq,
    CaseEq,
    NotEq,
    CaseNotEq,
    BitAnd,
    BitXor,
    BitOr,
    LogAnd,
    LogOr,
}

impl BinaryOpKind {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOpKind::Add => "+",
            BinaryOpKind::Sub => "-",
            BinaryOpKind::Mul => "*",
            BinaryOpKind::Div => "/",
            BinaryOpKind::Mod => "%",
            BinaryOpKind::Shl => "<<",
            BinaryOpKind::Shr => ">>",
            BinaryOpKind::Lt => "<",
            BinaryOpKind::Gt => ">",
            BinaryOpKind::LtEq => "<=",
            BinaryOpKind::GtEq => ">=",
            BinaryOpKind::Eq => "==",
            BinaryOpKind::CaseEq => "===",
            BinaryOpKind::NotEq => "!=",
            BinaryOpKind::CaseNotEq => "!==",
            BinaryOpKind::BitAnd => "&",
            BinaryOpKind::BitXor => "^",
            BinaryOpKind::BitOr => "|",
            BinaryOpKind::LogAnd => "&&",
            BinaryOpKind::LogOr => "||",
        }
    }
}

/// The three part-select shapes: `x[i]`, `x[m:l]`, `x[l+:n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectKind {
    Single,
    Range,
    Plus,
}

/// The tagged payload of a node. Child links are [`NodeId`]s into the same
/// arena.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Port {
        dir: PortDir,
        is_reg: bool,
        range: Option<NodeId>,
        ids: Vec<NodeId>,
        /// Declared in the ANSI header rather than among the items.
        in_portlist: bool,
    },
    Range {
        msb: NodeId,
        lsb: NodeId,
    },
    Parameter {
        kind: ParamKind,
        range: Option<NodeId>,
        assigns: Vec<NodeId>,
    },
    Wire {
        range: Option<NodeId>,
        /// `Id` or `Assign` children.
        ids: Vec<NodeId>,
    },
    Reg {
        range: Option<NodeId>,
        /// `Id` or `MemReg` children.
        ids: Vec<NodeId>,
    },
    MemReg {
        id: NodeId,
        range: NodeId,
    },
    ContAssigns {
        assigns: Vec<NodeId>,
    },
    Always {
        statement: NodeId,
    },
    Edge {
        polarity: Polarity,
        signal: NodeId,
    },
    ModuleInsts {
        module_name: NodeId,
        param_overrides: Vec<NodeId>,
        insts: Vec<NodeId>,
    },
    ModuleInst {
        inst_name: NodeId,
        connections: Vec<NodeId>,
    },
    Connection {
        port: NodeId,
        expr: NodeId,
    },
    Function {
        range: Option<NodeId>,
        name: NodeId,
        items: Vec<NodeId>,
        body: NodeId,
    },
    Case {
        kind: CaseKind,
        expr: NodeId,
        items: Vec<NodeId>,
    },
    CaseItem {
        /// Empty for the `default` item.
        exprs: Vec<NodeId>,
        statement: Option<NodeId>,
    },
    Assign {
        lval: NodeId,
        op: AssignOp,
        rval: NodeId,
        /// Statement assigns render their own terminating `;`.
        is_statement: bool,
    },
    At {
        /// Empty for `@*`.
        sens: Vec<NodeId>,
        statement: NodeId,
    },
    If {
        cond: NodeId,
        /// `None` when the branch is the null statement `;`.
        then_branch: Option<NodeId>,
        else_branch: Option<NodeId>,
    },
    For {
        init: NodeId,
        cond: NodeId,
        step: NodeId,
        body: NodeId,
    },
    While {
        cond: NodeId,
        body: NodeId,
    },
    Block {
        name: Option<String>,
        statements: Vec<NodeId>,
    },
    TaskCall {
        task: NodeId,
        args: Vec<NodeId>,
    },
    Generate {
        items: Vec<NodeId>,
    },
    GenerateBlock {
        name: Option<String>,
        items: Vec<NodeId>,
    },
    GenerateIf {
        cond: NodeId,
        then_branch: Option<NodeId>,
        else_branch: Option<NodeId>,
    },
    GenerateFor {
        init: NodeId,
        cond: NodeId,
        step: NodeId,
        body: NodeId,
    },
    GenerateCase {
        expr: NodeId,
        items: Vec<NodeId>,
    },
    GenerateCaseItem {
        exprs: Vec<NodeId>,
        item: Option<NodeId>,
    },
    Genvars {
        ids: Vec<NodeId>,
    },
    Metav {
        source: String,
    },
    Id {
        name: String,
    },
    PartSelect {
        base: NodeId,
        select: SelectKind,
        /// `Single`: the index. `Range`: the msb. `Plus`: the lsb.
        a: NodeId,
        /// `Range`: the lsb. `Plus`: the width. `Single`: absent.
        b: Option<NodeId>,
    },
    BinaryOp {
        op: BinaryOpKind,
        lhs: NodeId,
        rhs: NodeId,
    },
    UnaryOp {
        op: UnaryOpKind,
        expr: NodeId,
    },
    Ternary {
        cond: NodeId,
        then_expr: NodeId,
        else_expr: NodeId,
    },
    Repetition {
        count: NodeId,
        concat: NodeId,
    },
    Concatenation {
        exprs: Vec<NodeId>,
    },
    Number {
        value: VerilogNumber,
    },
    Str {
        /// Original text, quotes included.
        value: String,
    },
    Real {
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub range: SourceRange,
    pub parent: Option<NodeId>,
}

/// The arena owning every node of one module's tree.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node id in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn alloc(&mut self, kind: NodeKind, range: SourceRange) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("arena bound"));
        self.nodes.push(Node {
            kind,
            range,
            parent: None,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn range(&self, id: NodeId) -> &SourceRange {
        &self.nodes[id.index()].range
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) {
        self.nodes[child.index()].parent = Some(parent);
    }

    pub fn adopt(&mut self, parent: NodeId, children: impl IntoIterator<Item = NodeId>) {
        for child in children {
            self.set_parent(child, parent);
        }
    }

    /// Grow a node's end position past trailing punctuation.
    pub fn extend_pos(&mut self, id: NodeId, end: Pos) {
        self.nodes[id.index()].range.end = end;
    }

    /// The declared name behind a declaration-position child: an `Id`, the
    /// id of a `MemReg`, or the lvalue of an `Assign`.
    pub fn decl_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Id { name } => Some(name),
            NodeKind::MemReg { id, .. } => self.decl_name(*id),
            NodeKind::Assign { lval, .. } => self.decl_name(*lval),
            _ => None,
        }
    }

    /// Unlink `child` from `parent`'s child lists. Returns false when the
    /// child is not reachable from a severable position (scalar links such
    /// as a loop body cannot be severed).
    pub(crate) fn unlink(&mut self, parent: NodeId, child: NodeId) -> bool {
        fn drop_from(list: &mut Vec<NodeId>, child: NodeId) -> bool {
            let before = list.len();
            list.retain(|&c| c != child);
            list.len() != before
        }
        fn clear_opt(slot: &mut Option<NodeId>, child: NodeId) -> bool {
            if *slot == Some(child) {
                *slot = None;
                true
            } else {
                false
            }
        }
        let kind = &mut self.nodes[parent.index()].kind;
        match kind {
            NodeKind::Port { ids, range, .. } => drop_from(ids, child) || clear_opt(range, child),
            NodeKind::Parameter { assigns, range, .. } => {
                drop_from(assigns, child) || clear_opt(range, child)
            }
            NodeKind::Wire { ids, range } | NodeKind::Reg { ids, range } => {
                drop_from(ids, child) || clear_opt(range, child)
            }
            NodeKind::ContAssigns { assigns } => drop_from(assigns, child),
            NodeKind::ModuleInsts {
                param_overrides,
                insts,
                ..
            } => drop_from(param_overrides, child) || drop_from(insts, child),
            NodeKind::ModuleInst { connections, .. } => drop_from(connections, child),
            NodeKind::Function { items, .. } => drop_from(items, child),
            NodeKind::Case { items, .. } | NodeKind::GenerateCase { items, .. } => {
                drop_from(items, child)
            }
            NodeKind::CaseItem { exprs, statement } => {
                drop_from(exprs, child) || clear_opt(statement, child)
            }
            NodeKind::GenerateCaseItem { exprs, item } => {
                drop_from(exprs, child) || clear_opt(item, child)
            }
            NodeKind::At { sens, .. } => drop_from(sens, child),
            NodeKind::If {
                then_branch,
                else_branch,
                ..
            }
            | NodeKind::GenerateIf {
                then_branch,
                else_branch,
                ..
            } => clear_opt(then_branch, child) || clear_opt(else_branch, child),
            NodeKind::Block { statements, .. } => drop_from(statements, child),
            NodeKind::TaskCall { args, .. } => drop_from(args, child),
            NodeKind::Generate { items } | NodeKind::GenerateBlock { items, .. } => {
                drop_from(items, child)
            }
            NodeKind::Genvars { ids } => drop_from(ids, child),
            NodeKind::Concatenation { exprs } => drop_from(exprs, child),
            _ => false,
        }
    }
}
