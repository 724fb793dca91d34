//! Module trees, the declaration index, and the mutation operations scripts
//! drive.
//!
//! A [`Module`] owns the arena holding its whole syntax tree and two derived
//! indices: `ids`, mapping every declared name to its [`Decl`] entries, and
//! `insts`, mapping instantiated module names to their instantiation nodes.
//! Mutations (`delete`, `add_item`, `delete_child`) keep the tree, the
//! indices, and the shared edit plan in step: structural changes are always
//! mirrored as byte-range operations against the original files.

use core_edit::SharedEditPlan;
use core_source::{Pos, SourceRange};
use indexmap::IndexMap;
use tracing::debug;

pub mod builder;
pub mod node;
pub mod source_gen;

pub use builder::Builder;
pub use node::{
    AssignOp, Ast, BinaryOpKind, CaseKind, Node, NodeId, NodeKind, ParamKind, Polarity, PortDir,
    SelectKind, UnaryOpKind,
};

#[derive(Debug, thiserror::Error)]
pub enum AstError {
    #[error("node is not a child of this module")]
    NotAChild,
    #[error("add_port is not implemented for {style:?} port style")]
    AddPortUnimplemented { style: PortStyle },
    #[error(transparent)]
    Edit(#[from] core_edit::EditError),
}

/// How the module declares its ports: not at all, with directions in the
/// header (ANSI), or with plain header names and directions among the items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStyle {
    None,
    Ansi,
    Regular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Port,
    Parameter,
    Reg,
    Wire,
    Genvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclSubtype {
    Input,
    Output,
    Inout,
    Parameter,
    Localparam,
    Reg,
    Mem,
}

/// One declaration of a name. A single source declaration can yield several
/// entries: `output reg q` indexes `q` both as a port and as a reg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decl {
    pub kind: DeclKind,
    pub subtype: Option<DeclSubtype>,
    /// The declaring `Id` (or `MemReg`/`Assign`) node.
    pub id: NodeId,
    /// The declaration's bit range, when it has one.
    pub range: Option<NodeId>,
    /// The declaring item node.
    pub ast: NodeId,
}

/// A parsed `module … endmodule`, root of one syntax tree.
#[derive(Debug)]
pub struct Module {
    ast: Ast,
    name: String,
    /// The header `Id` node.
    pub name_id: NodeId,
    /// `#(parameter …)` header parameters.
    pub modparams: Vec<NodeId>,
    /// ANSI header ports, or plain header `Id`s in regular style.
    pub modports: Vec<NodeId>,
    pub items: Vec<NodeId>,
    pub port_style: PortStyle,
    pub range: SourceRange,
    /// Insertion point for added items: immediately before `endmodule`.
    pub append_pos: Pos,
    /// Embedded `Metav` script nodes attributed to this module.
    pub metav: Vec<NodeId>,
    ids: IndexMap<String, Vec<Decl>>,
    insts: IndexMap<String, NodeId>,
    edit_plan: SharedEditPlan,
}

impl Module {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ast: Ast,
        name_id: NodeId,
        modparams: Vec<NodeId>,
        modports: Vec<NodeId>,
        items: Vec<NodeId>,
        port_style: PortStyle,
        range: SourceRange,
        append_pos: Pos,
        edit_plan: SharedEditPlan,
    ) -> Self {
        let name = match ast.kind(name_id) {
            NodeKind::Id { name } => name.clone(),
            other => unreachable!("module name must be an Id, got {other:?}"),
        };
        let mut module = Self {
            ast,
            name,
            name_id,
            modparams,
            modports,
            items,
            port_style,
            range,
            append_pos,
            metav: Vec::new(),
            ids: IndexMap::new(),
            insts: IndexMap::new(),
            edit_plan,
        };
        module.reindex();
        module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Node factory for script-built subtrees.
    pub fn builder(&mut self) -> Builder<'_> {
        Builder::new(&mut self.ast)
    }

    pub fn ids(&self) -> &IndexMap<String, Vec<Decl>> {
        &self.ids
    }

    pub fn decls(&self, name: &str) -> &[Decl] {
        self.ids.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Instantiated module name → `ModuleInsts` node.
    pub fn insts(&self) -> &IndexMap<String, NodeId> {
        &self.insts
    }

    pub fn edit_plan(&self) -> &SharedEditPlan {
        &self.edit_plan
    }

    pub fn to_source(&self, id: NodeId) -> String {
        source_gen::to_source(&self.ast, id)
    }

    /// Record an embedded script against this module.
    pub fn attach_script(&mut self, source: String, pos: Pos) {
        let range = SourceRange::new(pos.clone(), pos);
        let id = self.ast.alloc(NodeKind::Metav { source }, range);
        self.metav.push(id);
    }

    pub fn script_source(&self, id: NodeId) -> Option<&str> {
        match self.ast.kind(id) {
            NodeKind::Metav { source } => Some(source),
            _ => None,
        }
    }

    /// Remove a node from the tree and schedule a recoverable `Remove` edit
    /// over its source range. Nodes that came from a macro expansion are
    /// rejected: there are no original-file bytes to remove.
    pub fn delete(&mut self, node: NodeId) -> Result<(), AstError> {
        let range = self.ast.range(node).clone();
        match self.ast.parent(node) {
            Some(parent) => {
                if !self.ast.unlink(parent, node) {
                    return Err(AstError::NotAChild);
                }
            }
            None => self.unlink_top(node)?,
        }
        self.edit_plan.borrow_mut().remove(range)?;
        debug!(target: "ast", module = %self.name, "deleted node");
        self.reindex();
        Ok(())
    }

    /// Unlink a direct child of the module header or body without emitting
    /// an edit.
    pub fn delete_child(&mut self, child: NodeId) -> Result<(), AstError> {
        self.unlink_top(child)?;
        self.reindex();
        Ok(())
    }

    fn unlink_top(&mut self, child: NodeId) -> Result<(), AstError> {
        for list in [&mut self.items, &mut self.modports, &mut self.modparams] {
            let before = list.len();
            list.retain(|&c| c != child);
            if list.len() != before {
                return Ok(());
            }
        }
        Err(AstError::NotAChild)
    }

    /// Append an item to the module and schedule its serialized source for
    /// insertion immediately before `endmodule`.
    pub fn add_item(&mut self, item: NodeId) -> Result<(), AstError> {
        let text = source_gen::to_source(&self.ast, item);
        self.items.push(item);
        self.edit_plan
            .borrow_mut()
            .insert(self.append_pos.clone(), text)?;
        debug!(target: "ast", module = %self.name, "added item");
        self.reindex();
        Ok(())
    }

    /// Port insertion is not supported in either port style.
    pub fn add_port(&mut self, _port: NodeId) -> Result<(), AstError> {
        Err(AstError::AddPortUnimplemented {
            style: self.port_style,
        })
    }

    pub fn extend_pos(&mut self, node: NodeId, end: Pos) {
        self.ast.extend_pos(node, end);
    }

    /// Rebuild `ids` and `insts` from the current tree.
    pub fn reindex(&mut self) {
        self.ids.clear();
        self.insts.clear();

        let params = self.modparams.clone();
        for p in params {
            self.index_parameter(p);
        }
        let ports = self.modports.clone();
        for p in ports {
            if matches!(self.ast.kind(p), NodeKind::Port { .. }) {
                self.index_port(p);
            }
        }
        let items = self.items.clone();
        for item in items {
            match self.ast.kind(item) {
                NodeKind::Port { .. } => self.index_port(item),
                NodeKind::Parameter { .. } => self.index_parameter(item),
                NodeKind::Wire { .. } => self.index_wire(item),
                NodeKind::Reg { .. } => self.index_reg(item),
                NodeKind::Genvars { .. } => self.index_genvars(item),
                NodeKind::ModuleInsts { module_name, .. } => {
                    if let NodeKind::Id { name } = self.ast.kind(*module_name) {
                        self.insts.insert(name.clone(), item);
                    }
                }
                _ => {}
            }
        }
        self.extract_output_regs();
    }

    fn push_decl(&mut self, child: NodeId, decl: Decl) {
        if let Some(name) = self.ast.decl_name(child) {
            self.ids.entry(name.to_string()).or_default().push(decl);
        }
    }

    fn index_port(&mut self, port: NodeId) {
        let NodeKind::Port { dir, range, ids, .. } = self.ast.kind(port) else {
            return;
        };
        let subtype = match dir {
            PortDir::Input => DeclSubtype::Input,
            PortDir::Output => DeclSubtype::Output,
            PortDir::Inout => DeclSubtype::Inout,
        };
        let (range, ids) = (*range, ids.clone());
        for id in ids {
            self.push_decl(
                id,
                Decl {
                    kind: DeclKind::Port,
                    subtype: Some(subtype),
                    id,
                    range,
                    ast: port,
                },
            );
        }
    }

    fn index_parameter(&mut self, param: NodeId) {
        let NodeKind::Parameter {
            kind,
            range,
            assigns,
        } = self.ast.kind(param)
        else {
            return;
        };
        let subtype = match kind {
            ParamKind::Parameter => DeclSubtype::Parameter,
            ParamKind::Localparam => DeclSubtype::Localparam,
        };
        let (range, assigns) = (*range, assigns.clone());
        for assign in assigns {
            self.push_decl(
                assign,
                Decl {
                    kind: DeclKind::Parameter,
                    subtype: Some(subtype),
                    id: assign,
                    range,
                    ast: param,
                },
            );
        }
    }

    fn index_wire(&mut self, wire: NodeId) {
        let NodeKind::Wire { range, ids } = self.ast.kind(wire) else {
            return;
        };
        let (range, ids) = (*range, ids.clone());
        for id in ids {
            self.push_decl(
                id,
                Decl {
                    kind: DeclKind::Wire,
                    subtype: None,
                    id,
                    range,
                    ast: wire,
                },
            );
        }
    }

    fn index_reg(&mut self, reg: NodeId) {
        let NodeKind::Reg { range, ids } = self.ast.kind(reg) else {
            return;
        };
        let (range, ids) = (*range, ids.clone());
        for id in ids {
            let subtype = if matches!(self.ast.kind(id), NodeKind::MemReg { .. }) {
                DeclSubtype::Mem
            } else {
                DeclSubtype::Reg
            };
            self.push_decl(
                id,
                Decl {
                    kind: DeclKind::Reg,
                    subtype: Some(subtype),
                    id,
                    range,
                    ast: reg,
                },
            );
        }
    }

    fn index_genvars(&mut self, genvars: NodeId) {
        let NodeKind::Genvars { ids } = self.ast.kind(genvars) else {
            return;
        };
        for id in ids.clone() {
            self.push_decl(
                id,
                Decl {
                    kind: DeclKind::Genvar,
                    subtype: None,
                    id,
                    range: None,
                    ast: genvars,
                },
            );
        }
    }

    /// `output reg q` declares a port *and* a reg: synthesize the reg entry
    /// so `ids["q"]` reports both.
    fn extract_output_regs(&mut self) {
        let mut synthesized = Vec::new();
        for decls in self.ids.values() {
            for decl in decls {
                if decl.kind != DeclKind::Port || decl.subtype != Some(DeclSubtype::Output) {
                    continue;
                }
                if let NodeKind::Port { is_reg: true, .. } = self.ast.kind(decl.ast) {
                    synthesized.push((
                        self.ast
                            .decl_name(decl.id)
                            .expect("port decl has a name")
                            .to_string(),
                        Decl {
                            kind: DeclKind::Reg,
                            subtype: Some(DeclSubtype::Reg),
                            id: decl.id,
                            range: decl.range,
                            ast: decl.ast,
                        },
                    ));
                }
            }
        }
        for (name, decl) in synthesized {
            self.ids.entry(name).or_default().push(decl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_edit::{EditOp, EditPlan};
    use core_source::Frame;

    fn file_range(byte: usize, len: usize) -> SourceRange {
        let start = Pos::in_file(Frame {
            byte,
            ..Frame::file("t.v")
        });
        SourceRange::new(start.clone(), start.offset(len))
    }

    fn empty_module(ast: Ast, name_id: NodeId, items: Vec<NodeId>) -> Module {
        Module::new(
            ast,
            name_id,
            vec![],
            vec![],
            items,
            PortStyle::None,
            file_range(0, 30),
            Pos::in_file(Frame {
                byte: 20,
                ..Frame::file("t.v")
            }),
            EditPlan::shared(),
        )
    }

    #[test]
    fn add_item_serializes_and_registers_an_insert() {
        let mut ast = Ast::new();
        let name = ast.alloc(NodeKind::Id { name: "m".into() }, file_range(7, 1));
        let mut module = empty_module(ast, name, vec![]);

        let y = module.builder().id("y");
        let wire = module.builder().wire(None, vec![y]);
        module.add_item(wire).unwrap();

        assert!(module.decls("y").iter().any(|d| d.kind == DeclKind::Wire));
        let plan = module.edit_plan().borrow();
        match &plan.ops()[0] {
            EditOp::Insert { at, text } => {
                assert_eq!(at.file_frame().byte, 20);
                assert_eq!(text, "wire y;");
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn delete_unlinks_and_registers_a_remove() {
        let mut ast = Ast::new();
        let name = ast.alloc(NodeKind::Id { name: "m".into() }, file_range(7, 1));
        let x = ast.alloc(NodeKind::Id { name: "x".into() }, file_range(15, 1));
        let wire = ast.alloc(
            NodeKind::Wire {
                range: None,
                ids: vec![x],
            },
            file_range(10, 7),
        );
        ast.set_parent(x, wire);
        let mut module = empty_module(ast, name, vec![wire]);
        assert_eq!(module.decls("x").len(), 1);

        module.delete(wire).unwrap();
        assert!(module.decls("x").is_empty());
        assert!(module.items.is_empty());
        let plan = module.edit_plan().borrow();
        assert!(matches!(plan.ops()[0], EditOp::Remove { .. }));
    }

    #[test]
    fn delete_of_macro_rooted_node_is_rejected() {
        let mut ast = Ast::new();
        let name = ast.alloc(NodeKind::Id { name: "m".into() }, file_range(7, 1));
        let start = Pos::new(vec![Frame::file("t.v"), Frame::macro_frame("W")]);
        let wire = ast.alloc(
            NodeKind::Wire {
                range: None,
                ids: vec![],
            },
            SourceRange::new(start.clone(), start.offset(7)),
        );
        let mut module = empty_module(ast, name, vec![wire]);
        assert!(matches!(
            module.delete(wire),
            Err(AstError::Edit(core_edit::EditError::UneditableRange { .. }))
        ));
    }

    #[test]
    fn delete_child_requires_membership() {
        let mut ast = Ast::new();
        let name = ast.alloc(NodeKind::Id { name: "m".into() }, file_range(7, 1));
        let stray = ast.alloc(NodeKind::Id { name: "s".into() }, file_range(0, 1));
        let mut module = empty_module(ast, name, vec![]);
        assert!(matches!(
            module.delete_child(stray),
            Err(AstError::NotAChild)
        ));
    }

    #[test]
    fn add_port_is_explicitly_unimplemented() {
        let mut ast = Ast::new();
        let name = ast.alloc(NodeKind::Id { name: "m".into() }, file_range(7, 1));
        let mut module = empty_module(ast, name, vec![]);
        let p = module.builder().id("p");
        let port = module.builder().port(PortDir::Input, false, None, vec![p]);
        assert!(matches!(
            module.add_port(port),
            Err(AstError::AddPortUnimplemented { .. })
        ));
    }

    #[test]
    fn output_reg_is_indexed_twice() {
        let mut ast = Ast::new();
        let name = ast.alloc(NodeKind::Id { name: "m".into() }, file_range(7, 1));
        let q = ast.alloc(NodeKind::Id { name: "q".into() }, file_range(25, 1));
        let msb = ast.alloc(
            NodeKind::Number {
                value: core_lex::VerilogNumber::parse("7").unwrap(),
            },
            file_range(21, 1),
        );
        let lsb = ast.alloc(
            NodeKind::Number {
                value: core_lex::VerilogNumber::parse("0").unwrap(),
            },
            file_range(23, 1),
        );
        let range = ast.alloc(NodeKind::Range { msb, lsb }, file_range(20, 5));
        let port = ast.alloc(
            NodeKind::Port {
                dir: PortDir::Output,
                is_reg: true,
                range: Some(range),
                ids: vec![q],
                in_portlist: true,
            },
            file_range(10, 17),
        );
        let module = Module::new(
            ast,
            name,
            vec![],
            vec![port],
            vec![],
            PortStyle::Ansi,
            file_range(0, 40),
            Pos::in_file(Frame {
                byte: 30,
                ..Frame::file("t.v")
            }),
            EditPlan::shared(),
        );

        let decls = module.decls("q");
        assert_eq!(decls.len(), 2);
        assert!(
            decls
                .iter()
                .any(|d| d.kind == DeclKind::Port && d.subtype == Some(DeclSubtype::Output))
        );
        assert!(
            decls
                .iter()
                .any(|d| d.kind == DeclKind::Reg && d.subtype == Some(DeclSubtype::Reg))
        );
    }

    #[test]
    fn serializer_renders_declarations() {
        let mut ast = Ast::new();
        let name = ast.alloc(NodeKind::Id { name: "m".into() }, file_range(7, 1));
        let mut module = empty_module(ast, name, vec![]);
        let mut b = module.builder();
        let msb = b.number(7);
        let lsb = b.number(0);
        let range = b.range(msb, lsb);
        let a = b.id("a");
        let mem_range = {
            let m0 = b.number(0);
            let m1 = b.number(63);
            b.range(m0, m1)
        };
        let mem = b.id("mem");
        let memreg = b.mem_reg(mem, mem_range);
        let reg = b.reg(Some(range), vec![a, memreg]);
        assert_eq!(module.to_source(reg), "reg [7:0] a,\n\t\tmem [0:63];");
    }
}
