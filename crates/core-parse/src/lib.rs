//! Recursive-descent parser from the annotated token stream to module trees.
//!
//! The grammar covers the Verilog-2001 subset the tool rewrites: module
//! headers in both port styles, declarations, continuous and procedural
//! assigns, instantiations, always blocks, functions, case/if/for/while
//! statements, generate regions, and the expression grammar with the usual
//! precedence ladder (dangling `else` binds to the nearest `if`). Every
//! reduction stamps its node's range from the boundary tokens and wires
//! parent links, so any node a script touches can be traced back to original
//! bytes.
//!
//! The first syntax error abandons the parse; the caller's edit plan is
//! never left partially applied because parsing registers no edits at all.

use core_ast::{
    AssignOp, Ast, BinaryOpKind, CaseKind, Module, NodeId, NodeKind, ParamKind, Polarity, PortDir,
    PortStyle, SelectKind, UnaryOpKind,
};
use core_edit::SharedEditPlan;
use core_lex::{LexOutput, Symbol, Token, TokenKind};
use core_source::{Pos, SourceRange};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("syntax error at {pos}: found {found}, expected {expected}")]
    Syntax {
        found: String,
        expected: String,
        pos: Pos,
    },
    #[error("module {module} mixes directed and plain header ports at {pos}")]
    InconsistentPortStyle { module: String, pos: Pos },
}

/// Parse every module in the token stream, attaching each module's embedded
/// scripts and handing every module the shared edit plan.
pub fn parse(lexed: &LexOutput, plan: &SharedEditPlan) -> Result<Vec<Module>, ParseError> {
    let mut parser = Parser {
        tokens: &lexed.tokens,
        at: 0,
        ast: Ast::new(),
    };
    let mut modules = Vec::new();
    while parser.peek().is_some() {
        let mut module = parser.module(plan.clone())?;
        for script in &lexed.scripts {
            if script.module.as_deref() == Some(module.name()) {
                module.attach_script(script.source.clone(), script.pos.clone());
            }
        }
        debug!(target: "parse", module = module.name(), items = module.items.len(), "parsed module");
        modules.push(module);
    }
    Ok(modules)
}

struct Parser<'a> {
    tokens: &'a [Token],
    at: usize,
    ast: Ast,
}

impl<'a> Parser<'a> {
    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.at)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn check_sym(&self, sym: Symbol) -> bool {
        self.check(TokenKind::Sym(sym))
    }

    fn bump(&mut self) -> &'a Token {
        let tok = &self.tokens[self.at];
        self.at += 1;
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn eat_sym(&mut self, sym: Symbol) -> bool {
        self.eat(TokenKind::Sym(sym))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'a Token, ParseError> {
        if self.check(kind) {
            Ok(self.bump())
        } else {
            Err(self.err(kind.to_string()))
        }
    }

    fn expect_sym(&mut self, sym: Symbol) -> Result<&'a Token, ParseError> {
        self.expect(TokenKind::Sym(sym))
    }

    fn err(&self, expected: impl Into<String>) -> ParseError {
        match self.peek() {
            Some(t) => ParseError::Syntax {
                found: describe(t),
                expected: expected.into(),
                pos: t.range.start.clone(),
            },
            None => ParseError::Syntax {
                found: "end of input".to_string(),
                expected: expected.into(),
                pos: self.prev_end(),
            },
        }
    }

    /// End position of the last consumed token.
    fn prev_end(&self) -> Pos {
        match self.tokens.get(self.at.saturating_sub(1)) {
            Some(t) => t.range.end.clone(),
            None => Pos::in_file(core_source::Frame::file("<input>")),
        }
    }

    fn range_from(&self, start: &Pos) -> SourceRange {
        SourceRange::new(start.clone(), self.prev_end())
    }

    fn node(&mut self, kind: NodeKind, range: SourceRange, children: &[NodeId]) -> NodeId {
        let id = self.ast.alloc(kind, range);
        self.ast.adopt(id, children.iter().copied());
        id
    }

    fn id_node(&mut self, tok: &Token) -> NodeId {
        self.ast.alloc(
            NodeKind::Id {
                name: tok.text.clone(),
            },
            tok.range.clone(),
        )
    }

    fn expect_id_node(&mut self) -> Result<NodeId, ParseError> {
        let tok = self.expect(TokenKind::Id)?;
        Ok(self.id_node(tok))
    }

    // ------------------------------------------------------------------
    // Module structure
    // ------------------------------------------------------------------

    fn module(&mut self, plan: SharedEditPlan) -> Result<Module, ParseError> {
        let module_tok = self.expect(TokenKind::Module)?;
        let start = module_tok.range.start.clone();
        let name = self.expect_id_node()?;

        let modparams = if self.check_sym(Symbol::Hash) {
            self.module_params()?
        } else {
            Vec::new()
        };

        let (modports, port_style) = if self.eat_sym(Symbol::LParen) {
            self.port_list(name)?
        } else {
            (Vec::new(), PortStyle::None)
        };
        self.expect_sym(Symbol::Semi)?;

        let mut items = Vec::new();
        while !self.check(TokenKind::Endmodule) {
            if self.peek().is_none() {
                return Err(self.err("endmodule"));
            }
            items.push(self.module_item()?);
        }
        let endmodule = self.expect(TokenKind::Endmodule)?;

        Ok(Module::new(
            std::mem::take(&mut self.ast),
            name,
            modparams,
            modports,
            items,
            port_style,
            SourceRange::new(start, endmodule.range.end.clone()),
            endmodule.range.start.clone(),
            plan,
        ))
    }

    /// `#(parameter a = 1, b = 2)`
    fn module_params(&mut self) -> Result<Vec<NodeId>, ParseError> {
        self.expect_sym(Symbol::Hash)?;
        self.expect_sym(Symbol::LParen)?;
        let kw = self.expect(TokenKind::Parameter)?;
        let start = kw.range.start.clone();
        let range = self.range_opt()?;
        let assigns = self.id_assigns()?;
        self.expect_sym(Symbol::RParen)?;
        let mut children = assigns.clone();
        children.extend(range);
        let node = self.node(
            NodeKind::Parameter {
                kind: ParamKind::Parameter,
                range,
                assigns,
            },
            self.range_from(&start),
            &children,
        );
        Ok(vec![node])
    }

    /// The header port list, after the opening parenthesis. Decides the
    /// module's port style: directions present means ANSI (plain names then
    /// extend the previous directed group); no directions at all means
    /// regular style with the directions among the items.
    fn port_list(&mut self, module_name: NodeId) -> Result<(Vec<NodeId>, PortStyle), ParseError> {
        if self.eat_sym(Symbol::RParen) {
            return Ok((Vec::new(), PortStyle::Regular));
        }
        match self.peek_kind() {
            Some(TokenKind::Input | TokenKind::Output | TokenKind::Inout) => {
                let ports = self.ansi_ports(module_name)?;
                Ok((ports, PortStyle::Ansi))
            }
            Some(TokenKind::Id) => {
                let mut ids = Vec::new();
                loop {
                    if matches!(
                        self.peek_kind(),
                        Some(TokenKind::Input | TokenKind::Output | TokenKind::Inout)
                    ) {
                        let pos = self.peek().expect("just matched").range.start.clone();
                        let module = match self.ast.kind(module_name) {
                            NodeKind::Id { name } => name.clone(),
                            _ => String::new(),
                        };
                        return Err(ParseError::InconsistentPortStyle { module, pos });
                    }
                    ids.push(self.expect_id_node()?);
                    if !self.eat_sym(Symbol::Comma) {
                        break;
                    }
                }
                self.expect_sym(Symbol::RParen)?;
                Ok((ids, PortStyle::Regular))
            }
            _ => Err(self.err("port declaration or ')'")),
        }
    }

    fn ansi_ports(&mut self, module_name: NodeId) -> Result<Vec<NodeId>, ParseError> {
        let mut ports: Vec<NodeId> = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Input | TokenKind::Output | TokenKind::Inout) => {
                    ports.push(self.ansi_port()?);
                }
                Some(TokenKind::Id) => {
                    // Continuation identifier: belongs to the previous
                    // directed group.
                    let Some(&last) = ports.last() else {
                        let pos = self.peek().expect("just matched").range.start.clone();
                        let module = match self.ast.kind(module_name) {
                            NodeKind::Id { name } => name.clone(),
                            _ => String::new(),
                        };
                        return Err(ParseError::InconsistentPortStyle { module, pos });
                    };
                    let id = self.expect_id_node()?;
                    self.ast.set_parent(id, last);
                    let end = self.prev_end();
                    if let NodeKind::Port { ids, .. } = &mut self.ast.node_mut(last).kind {
                        ids.push(id);
                    }
                    self.ast.extend_pos(last, end);
                }
                _ => return Err(self.err("port declaration")),
            }
            if !self.eat_sym(Symbol::Comma) {
                break;
            }
        }
        self.expect_sym(Symbol::RParen)?;
        Ok(ports)
    }

    fn ansi_port(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.bump();
        let start = kw.range.start.clone();
        let dir = match kw.kind {
            TokenKind::Input => PortDir::Input,
            TokenKind::Output => PortDir::Output,
            TokenKind::Inout => PortDir::Inout,
            _ => unreachable!("caller checked for a direction keyword"),
        };
        let is_reg = dir == PortDir::Output && self.eat(TokenKind::Reg);
        let range = self.range_opt()?;
        let id = self.expect_id_node()?;
        let mut children = vec![id];
        children.extend(range);
        Ok(self.node(
            NodeKind::Port {
                dir,
                is_reg,
                range,
                ids: vec![id],
                in_portlist: true,
            },
            self.range_from(&start),
            &children,
        ))
    }

    fn module_item(&mut self) -> Result<NodeId, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Parameter | TokenKind::Localparam) => {
                let item = self.parameter_decl()?;
                self.finish_item(item)
            }
            Some(TokenKind::Input | TokenKind::Output | TokenKind::Inout) => {
                let item = self.port_decl()?;
                self.finish_item(item)
            }
            Some(TokenKind::Wire) => {
                let item = self.wire_decl()?;
                self.finish_item(item)
            }
            Some(TokenKind::Reg) => {
                let item = self.reg_decl()?;
                self.finish_item(item)
            }
            Some(TokenKind::Genvar) => {
                let item = self.genvar_decl()?;
                self.finish_item(item)
            }
            Some(TokenKind::Assign) => {
                let item = self.continuous_assign()?;
                self.finish_item(item)
            }
            Some(TokenKind::Always) => self.always_block(),
            Some(TokenKind::Function) => self.function_decl(),
            Some(TokenKind::Generate) => self.generate_region(),
            Some(TokenKind::Id) => {
                let item = self.module_instantiation()?;
                self.finish_item(item)
            }
            _ => Err(self.err("module item")),
        }
    }

    /// Consume the terminating `;` and stretch the item over it, so deleting
    /// the item removes its terminator too.
    fn finish_item(&mut self, item: NodeId) -> Result<NodeId, ParseError> {
        let semi = self.expect_sym(Symbol::Semi)?;
        self.ast.extend_pos(item, semi.range.end.clone());
        Ok(item)
    }

    fn parameter_decl(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.bump();
        let start = kw.range.start.clone();
        let kind = if kw.kind == TokenKind::Localparam {
            ParamKind::Localparam
        } else {
            ParamKind::Parameter
        };
        let range = self.range_opt()?;
        let assigns = self.id_assigns()?;
        let mut children = assigns.clone();
        children.extend(range);
        Ok(self.node(
            NodeKind::Parameter {
                kind,
                range,
                assigns,
            },
            self.range_from(&start),
            &children,
        ))
    }

    fn id_assigns(&mut self) -> Result<Vec<NodeId>, ParseError> {
        let mut assigns = vec![self.id_assign()?];
        while self.eat_sym(Symbol::Comma) {
            assigns.push(self.id_assign()?);
        }
        Ok(assigns)
    }

    fn id_assign(&mut self) -> Result<NodeId, ParseError> {
        let start = self
            .peek()
            .ok_or_else(|| self.err("identifier"))?
            .range
            .start
            .clone();
        let lval = self.expect_id_node()?;
        self.expect_sym(Symbol::Eq)?;
        let rval = self.expression()?;
        Ok(self.node(
            NodeKind::Assign {
                lval,
                op: AssignOp::Blocking,
                rval,
                is_statement: false,
            },
            self.range_from(&start),
            &[lval, rval],
        ))
    }

    fn port_decl(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.bump();
        let start = kw.range.start.clone();
        let dir = match kw.kind {
            TokenKind::Input => PortDir::Input,
            TokenKind::Output => PortDir::Output,
            _ => PortDir::Inout,
        };
        let is_reg = dir == PortDir::Output && self.eat(TokenKind::Reg);
        let range = self.range_opt()?;
        let mut ids = vec![self.expect_id_node()?];
        while self.eat_sym(Symbol::Comma) {
            ids.push(self.expect_id_node()?);
        }
        let mut children = ids.clone();
        children.extend(range);
        Ok(self.node(
            NodeKind::Port {
                dir,
                is_reg,
                range,
                ids,
                in_portlist: false,
            },
            self.range_from(&start),
            &children,
        ))
    }

    fn wire_decl(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::Wire)?;
        let start = kw.range.start.clone();
        let range = self.range_opt()?;
        let mut ids = Vec::new();
        loop {
            let id_start = self
                .peek()
                .ok_or_else(|| self.err("identifier"))?
                .range
                .start
                .clone();
            let id = self.expect_id_node()?;
            if self.eat_sym(Symbol::Eq) {
                let rval = self.expression()?;
                ids.push(self.node(
                    NodeKind::Assign {
                        lval: id,
                        op: AssignOp::Blocking,
                        rval,
                        is_statement: false,
                    },
                    self.range_from(&id_start),
                    &[id, rval],
                ));
            } else {
                ids.push(id);
            }
            if !self.eat_sym(Symbol::Comma) {
                break;
            }
        }
        let mut children = ids.clone();
        children.extend(range);
        Ok(self.node(
            NodeKind::Wire { range, ids },
            self.range_from(&start),
            &children,
        ))
    }

    fn reg_decl(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::Reg)?;
        let start = kw.range.start.clone();
        let range = self.range_opt()?;
        let mut ids = Vec::new();
        loop {
            let id_start = self
                .peek()
                .ok_or_else(|| self.err("identifier"))?
                .range
                .start
                .clone();
            let id = self.expect_id_node()?;
            if self.check_sym(Symbol::LBracket) {
                // A memory: `reg [7:0] mem [0:63]`.
                let mem_range = self.bit_range()?;
                ids.push(self.node(
                    NodeKind::MemReg {
                        id,
                        range: mem_range,
                    },
                    self.range_from(&id_start),
                    &[id, mem_range],
                ));
            } else {
                ids.push(id);
            }
            if !self.eat_sym(Symbol::Comma) {
                break;
            }
        }
        let mut children = ids.clone();
        children.extend(range);
        Ok(self.node(
            NodeKind::Reg { range, ids },
            self.range_from(&start),
            &children,
        ))
    }

    fn genvar_decl(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::Genvar)?;
        let start = kw.range.start.clone();
        let mut ids = vec![self.expect_id_node()?];
        while self.eat_sym(Symbol::Comma) {
            ids.push(self.expect_id_node()?);
        }
        let children = ids.clone();
        Ok(self.node(
            NodeKind::Genvars { ids },
            self.range_from(&start),
            &children,
        ))
    }

    fn continuous_assign(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::Assign)?;
        let start = kw.range.start.clone();
        let mut assigns = vec![self.assignment(false)?];
        while self.eat_sym(Symbol::Comma) {
            assigns.push(self.assignment(false)?);
        }
        let children = assigns.clone();
        Ok(self.node(
            NodeKind::ContAssigns { assigns },
            self.range_from(&start),
            &children,
        ))
    }

    /// `lvalue (=|<=) expression`, where the lvalue is an identifier, a
    /// part-select, or a concatenation.
    fn assignment(&mut self, statement: bool) -> Result<NodeId, ParseError> {
        let start = self
            .peek()
            .ok_or_else(|| self.err("assignment"))?
            .range
            .start
            .clone();
        let lval = self.lvalue()?;
        let op = if self.eat_sym(Symbol::Eq) {
            AssignOp::Blocking
        } else if self.eat_sym(Symbol::LtEq) {
            AssignOp::NonBlocking
        } else {
            return Err(self.err("'=' or '<='"));
        };
        let rval = self.expression()?;
        Ok(self.node(
            NodeKind::Assign {
                lval,
                op,
                rval,
                is_statement: statement,
            },
            self.range_from(&start),
            &[lval, rval],
        ))
    }

    fn lvalue(&mut self) -> Result<NodeId, ParseError> {
        if self.check_sym(Symbol::LBrace) {
            return self.concatenation_or_repetition();
        }
        let id = self.expect_id_node()?;
        if self.check_sym(Symbol::LBracket) {
            self.part_select(id)
        } else {
            Ok(id)
        }
    }

    fn module_instantiation(&mut self) -> Result<NodeId, ParseError> {
        let name_tok = self.expect(TokenKind::Id)?;
        let start = name_tok.range.start.clone();
        let module_name = self.id_node(name_tok);
        let param_overrides = if self.eat_sym(Symbol::Hash) {
            self.expect_sym(Symbol::LParen)?;
            let conns = self.connections()?;
            self.expect_sym(Symbol::RParen)?;
            conns
        } else {
            Vec::new()
        };
        let mut insts = vec![self.instantiation()?];
        while self.eat_sym(Symbol::Comma) {
            insts.push(self.instantiation()?);
        }
        let mut children = vec![module_name];
        children.extend(&param_overrides);
        children.extend(&insts);
        Ok(self.node(
            NodeKind::ModuleInsts {
                module_name,
                param_overrides,
                insts,
            },
            self.range_from(&start),
            &children,
        ))
    }

    fn instantiation(&mut self) -> Result<NodeId, ParseError> {
        let start = self
            .peek()
            .ok_or_else(|| self.err("instance name"))?
            .range
            .start
            .clone();
        let inst_name = self.expect_id_node()?;
        self.expect_sym(Symbol::LParen)?;
        let connections = if self.check_sym(Symbol::RParen) {
            Vec::new()
        } else {
            self.connections()?
        };
        self.expect_sym(Symbol::RParen)?;
        let mut children = vec![inst_name];
        children.extend(&connections);
        Ok(self.node(
            NodeKind::ModuleInst {
                inst_name,
                connections,
            },
            self.range_from(&start),
            &children,
        ))
    }

    /// `.name(expr), .name(expr), …`
    fn connections(&mut self) -> Result<Vec<NodeId>, ParseError> {
        let mut conns = vec![self.connection()?];
        while self.eat_sym(Symbol::Comma) {
            conns.push(self.connection()?);
        }
        Ok(conns)
    }

    fn connection(&mut self) -> Result<NodeId, ParseError> {
        let dot = self.expect_sym(Symbol::Dot)?;
        let start = dot.range.start.clone();
        let port = self.expect_id_node()?;
        self.expect_sym(Symbol::LParen)?;
        let expr = self.expression()?;
        let rparen = self.expect_sym(Symbol::RParen)?;
        let range = SourceRange::new(start, rparen.range.end.clone());
        Ok(self.node(NodeKind::Connection { port, expr }, range, &[port, expr]))
    }

    fn always_block(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::Always)?;
        let start = kw.range.start.clone();
        let statement = self.statement()?;
        Ok(self.node(
            NodeKind::Always { statement },
            self.range_from(&start),
            &[statement],
        ))
    }

    fn function_decl(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::Function)?;
        let start = kw.range.start.clone();
        let range = self.range_opt()?;
        let name = self.expect_id_node()?;
        self.expect_sym(Symbol::Semi)?;
        let mut items = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Input | TokenKind::Output | TokenKind::Inout) => {
                    let item = self.port_decl()?;
                    items.push(self.finish_item(item)?);
                }
                Some(TokenKind::Reg) => {
                    let item = self.reg_decl()?;
                    items.push(self.finish_item(item)?);
                }
                _ => break,
            }
        }
        let body = self.statement()?;
        self.expect(TokenKind::Endfunction)?;
        let mut children = vec![name, body];
        children.extend(range);
        children.extend(&items);
        Ok(self.node(
            NodeKind::Function {
                range,
                name,
                items,
                body,
            },
            self.range_from(&start),
            &children,
        ))
    }

    // ------------------------------------------------------------------
    // Generate constructs
    // ------------------------------------------------------------------

    fn generate_region(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::Generate)?;
        let start = kw.range.start.clone();
        let mut items = Vec::new();
        while !self.check(TokenKind::Endgenerate) {
            if self.peek().is_none() {
                return Err(self.err("endgenerate"));
            }
            items.push(self.generate_item()?);
        }
        self.expect(TokenKind::Endgenerate)?;
        let children = items.clone();
        Ok(self.node(
            NodeKind::Generate { items },
            self.range_from(&start),
            &children,
        ))
    }

    fn generate_item(&mut self) -> Result<NodeId, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::For) => self.generate_for(),
            Some(TokenKind::If) => self.generate_if(),
            Some(TokenKind::Case) => self.generate_case(),
            Some(TokenKind::Begin) => self.generate_block(),
            _ => self.module_item(),
        }
    }

    fn generate_item_opt(&mut self) -> Result<Option<NodeId>, ParseError> {
        if self.eat_sym(Symbol::Semi) {
            Ok(None)
        } else {
            Ok(Some(self.generate_item()?))
        }
    }

    fn generate_for(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::For)?;
        let start = kw.range.start.clone();
        self.expect_sym(Symbol::LParen)?;
        let init = self.id_assign()?;
        self.expect_sym(Symbol::Semi)?;
        let cond = self.expression()?;
        self.expect_sym(Symbol::Semi)?;
        let step = self.id_assign()?;
        self.expect_sym(Symbol::RParen)?;
        let body = self.generate_item()?;
        Ok(self.node(
            NodeKind::GenerateFor {
                init,
                cond,
                step,
                body,
            },
            self.range_from(&start),
            &[init, cond, step, body],
        ))
    }

    fn generate_if(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::If)?;
        let start = kw.range.start.clone();
        self.expect_sym(Symbol::LParen)?;
        let cond = self.expression()?;
        self.expect_sym(Symbol::RParen)?;
        let then_branch = self.generate_item_opt()?;
        // Same dangling-else rule as statements: nearest if wins.
        let else_branch = if self.eat(TokenKind::Else) {
            self.generate_item_opt()?
        } else {
            None
        };
        let children: Vec<_> = [Some(cond), then_branch, else_branch]
            .into_iter()
            .flatten()
            .collect();
        Ok(self.node(
            NodeKind::GenerateIf {
                cond,
                then_branch,
                else_branch,
            },
            self.range_from(&start),
            &children,
        ))
    }

    fn generate_case(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::Case)?;
        let start = kw.range.start.clone();
        self.expect_sym(Symbol::LParen)?;
        let expr = self.expression()?;
        self.expect_sym(Symbol::RParen)?;
        let mut items = Vec::new();
        while !self.check(TokenKind::Endcase) {
            if self.peek().is_none() {
                return Err(self.err("endcase"));
            }
            items.push(self.generate_case_item()?);
        }
        self.expect(TokenKind::Endcase)?;
        let mut children = vec![expr];
        children.extend(&items);
        Ok(self.node(
            NodeKind::GenerateCase { expr, items },
            self.range_from(&start),
            &children,
        ))
    }

    fn generate_case_item(&mut self) -> Result<NodeId, ParseError> {
        let start = self
            .peek()
            .ok_or_else(|| self.err("case item"))?
            .range
            .start
            .clone();
        let exprs = if self.eat(TokenKind::Default) {
            self.eat_sym(Symbol::Colon);
            Vec::new()
        } else {
            let exprs = self.expressions()?;
            self.expect_sym(Symbol::Colon)?;
            exprs
        };
        let item = self.generate_item_opt()?;
        let children: Vec<_> = exprs.iter().copied().chain(item).collect();
        Ok(self.node(
            NodeKind::GenerateCaseItem { exprs, item },
            self.range_from(&start),
            &children,
        ))
    }

    fn generate_block(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::Begin)?;
        let start = kw.range.start.clone();
        let name = if self.eat_sym(Symbol::Colon) {
            Some(self.expect(TokenKind::Id)?.text.clone())
        } else {
            None
        };
        let mut items = Vec::new();
        while !self.check(TokenKind::End) {
            if self.peek().is_none() {
                return Err(self.err("end"));
            }
            items.push(self.generate_item()?);
        }
        self.expect(TokenKind::End)?;
        let children = items.clone();
        Ok(self.node(
            NodeKind::GenerateBlock { name, items },
            self.range_from(&start),
            &children,
        ))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement_opt(&mut self) -> Result<Option<NodeId>, ParseError> {
        if self.eat_sym(Symbol::Semi) {
            Ok(None)
        } else {
            Ok(Some(self.statement()?))
        }
    }

    fn statement(&mut self) -> Result<NodeId, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Begin) => self.block(),
            Some(TokenKind::If) => self.if_statement(),
            Some(TokenKind::Case | TokenKind::Casez | TokenKind::Casex) => self.case_statement(),
            Some(TokenKind::For) => self.for_statement(),
            Some(TokenKind::While) => self.while_statement(),
            Some(TokenKind::Sym(Symbol::At)) => self.at_statement(),
            Some(TokenKind::SysId) => self.task_call_statement(),
            Some(TokenKind::Id | TokenKind::Sym(Symbol::LBrace)) => {
                // A user task call, or an assignment.
                if self.check(TokenKind::Id)
                    && matches!(
                        self.tokens.get(self.at + 1).map(|t| t.kind),
                        Some(TokenKind::Sym(Symbol::LParen) | TokenKind::Sym(Symbol::Semi))
                    )
                {
                    return self.task_call_statement();
                }
                let assign = self.assignment(true)?;
                let semi = self.expect_sym(Symbol::Semi)?;
                self.ast.extend_pos(assign, semi.range.end.clone());
                Ok(assign)
            }
            _ => Err(self.err("statement")),
        }
    }

    fn block(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::Begin)?;
        let start = kw.range.start.clone();
        let name = if self.eat_sym(Symbol::Colon) {
            Some(self.expect(TokenKind::Id)?.text.clone())
        } else {
            None
        };
        let mut statements = Vec::new();
        while !self.check(TokenKind::End) {
            if self.peek().is_none() {
                return Err(self.err("end"));
            }
            match self.statement_opt()? {
                Some(s) => statements.push(s),
                None => {}
            }
        }
        self.expect(TokenKind::End)?;
        let children = statements.clone();
        Ok(self.node(
            NodeKind::Block { name, statements },
            self.range_from(&start),
            &children,
        ))
    }

    fn if_statement(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::If)?;
        let start = kw.range.start.clone();
        self.expect_sym(Symbol::LParen)?;
        let cond = self.expression()?;
        self.expect_sym(Symbol::RParen)?;
        let then_branch = self.statement_opt()?;
        // Dangling else binds here, to the innermost if.
        let else_branch = if self.eat(TokenKind::Else) {
            self.statement_opt()?
        } else {
            None
        };
        let children: Vec<_> = [Some(cond), then_branch, else_branch]
            .into_iter()
            .flatten()
            .collect();
        Ok(self.node(
            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            },
            self.range_from(&start),
            &children,
        ))
    }

    fn case_statement(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.bump();
        let start = kw.range.start.clone();
        let kind = match kw.kind {
            TokenKind::Casez => CaseKind::Casez,
            TokenKind::Casex => CaseKind::Casex,
            _ => CaseKind::Case,
        };
        self.expect_sym(Symbol::LParen)?;
        let expr = self.expression()?;
        self.expect_sym(Symbol::RParen)?;
        let mut items = Vec::new();
        while !self.check(TokenKind::Endcase) {
            if self.peek().is_none() {
                return Err(self.err("endcase"));
            }
            items.push(self.case_item()?);
        }
        self.expect(TokenKind::Endcase)?;
        let mut children = vec![expr];
        children.extend(&items);
        Ok(self.node(
            NodeKind::Case { kind, expr, items },
            self.range_from(&start),
            &children,
        ))
    }

    fn case_item(&mut self) -> Result<NodeId, ParseError> {
        let start = self
            .peek()
            .ok_or_else(|| self.err("case item"))?
            .range
            .start
            .clone();
        let exprs = if self.eat(TokenKind::Default) {
            self.eat_sym(Symbol::Colon);
            Vec::new()
        } else {
            let exprs = self.expressions()?;
            self.expect_sym(Symbol::Colon)?;
            exprs
        };
        let statement = self.statement_opt()?;
        let children: Vec<_> = exprs.iter().copied().chain(statement).collect();
        Ok(self.node(
            NodeKind::CaseItem { exprs, statement },
            self.range_from(&start),
            &children,
        ))
    }

    fn for_statement(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::For)?;
        let start = kw.range.start.clone();
        self.expect_sym(Symbol::LParen)?;
        let init = self.id_assign()?;
        self.expect_sym(Symbol::Semi)?;
        let cond = self.expression()?;
        self.expect_sym(Symbol::Semi)?;
        let step = self.id_assign()?;
        self.expect_sym(Symbol::RParen)?;
        let body = self.statement()?;
        Ok(self.node(
            NodeKind::For {
                init,
                cond,
                step,
                body,
            },
            self.range_from(&start),
            &[init, cond, step, body],
        ))
    }

    fn while_statement(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.expect(TokenKind::While)?;
        let start = kw.range.start.clone();
        self.expect_sym(Symbol::LParen)?;
        let cond = self.expression()?;
        self.expect_sym(Symbol::RParen)?;
        let body = self.statement()?;
        Ok(self.node(
            NodeKind::While { cond, body },
            self.range_from(&start),
            &[cond, body],
        ))
    }

    fn at_statement(&mut self) -> Result<NodeId, ParseError> {
        let at = self.expect_sym(Symbol::At)?;
        let start = at.range.start.clone();
        let sens = if self.eat_sym(Symbol::Star) {
            Vec::new()
        } else {
            self.expect_sym(Symbol::LParen)?;
            let sens = if self.eat_sym(Symbol::Star) {
                Vec::new()
            } else {
                self.sensitivity_list()?
            };
            self.expect_sym(Symbol::RParen)?;
            sens
        };
        let statement = match self.statement_opt()? {
            Some(s) => s,
            None => {
                // `@(posedge clk);` has no body; represent it as an empty
                // block so the event control still forms a statement.
                let end = self.prev_end();
                self.node(
                    NodeKind::Block {
                        name: None,
                        statements: vec![],
                    },
                    SourceRange::new(end.clone(), end),
                    &[],
                )
            }
        };
        let mut children = sens.clone();
        children.push(statement);
        Ok(self.node(
            NodeKind::At { sens, statement },
            self.range_from(&start),
            &children,
        ))
    }

    fn sensitivity_list(&mut self) -> Result<Vec<NodeId>, ParseError> {
        let mut sens = vec![self.sensitivity()?];
        while self.eat(TokenKind::Or) {
            sens.push(self.sensitivity()?);
        }
        Ok(sens)
    }

    fn sensitivity(&mut self) -> Result<NodeId, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Posedge | TokenKind::Negedge) => {
                let kw = self.bump();
                let start = kw.range.start.clone();
                let polarity = if kw.kind == TokenKind::Posedge {
                    Polarity::Posedge
                } else {
                    Polarity::Negedge
                };
                let signal = self.expect_id_node()?;
                Ok(self.node(
                    NodeKind::Edge { polarity, signal },
                    self.range_from(&start),
                    &[signal],
                ))
            }
            _ => self.expect_id_node(),
        }
    }

    fn task_call_statement(&mut self) -> Result<NodeId, ParseError> {
        let tok = self.bump();
        let start = tok.range.start.clone();
        let task = self.ast.alloc(
            NodeKind::Id {
                name: tok.text.clone(),
            },
            tok.range.clone(),
        );
        let args = if self.eat_sym(Symbol::LParen) {
            let args = if self.check_sym(Symbol::RParen) {
                Vec::new()
            } else {
                self.expressions()?
            };
            self.expect_sym(Symbol::RParen)?;
            args
        } else {
            Vec::new()
        };
        self.expect_sym(Symbol::Semi)?;
        let mut children = vec![task];
        children.extend(&args);
        Ok(self.node(
            NodeKind::TaskCall { task, args },
            self.range_from(&start),
            &children,
        ))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expressions(&mut self) -> Result<Vec<NodeId>, ParseError> {
        let mut exprs = vec![self.expression()?];
        while self.eat_sym(Symbol::Comma) {
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    fn expression(&mut self) -> Result<NodeId, ParseError> {
        let start = self
            .peek()
            .ok_or_else(|| self.err("expression"))?
            .range
            .start
            .clone();
        let cond = self.binary_expr(0)?;
        if self.eat_sym(Symbol::Question) {
            let then_expr = self.expression()?;
            self.expect_sym(Symbol::Colon)?;
            let else_expr = self.expression()?;
            return Ok(self.node(
                NodeKind::Ternary {
                    cond,
                    then_expr,
                    else_expr,
                },
                self.range_from(&start),
                &[cond, then_expr, else_expr],
            ));
        }
        Ok(cond)
    }

    /// Precedence-climbing over the binary operator ladder, lowest level
    /// first.
    fn binary_expr(&mut self, level: usize) -> Result<NodeId, ParseError> {
        const LEVELS: &[&[(Symbol, BinaryOpKind)]] = &[
            &[(Symbol::PipePipe, BinaryOpKind::LogOr)],
            &[(Symbol::AmpAmp, BinaryOpKind::LogAnd)],
            &[(Symbol::Pipe, BinaryOpKind::BitOr)],
            &[(Symbol::Caret, BinaryOpKind::BitXor)],
            &[(Symbol::Amp, BinaryOpKind::BitAnd)],
            &[
                (Symbol::EqEq, BinaryOpKind::Eq),
                (Symbol::CaseEq, BinaryOpKind::CaseEq),
                (Symbol::NotEq, BinaryOpKind::NotEq),
                (Symbol::CaseNotEq, BinaryOpKind::CaseNotEq),
            ],
            &[
                (Symbol::Lt, BinaryOpKind::Lt),
                (Symbol::Gt, BinaryOpKind::Gt),
                (Symbol::LtEq, BinaryOpKind::LtEq),
                (Symbol::GtEq, BinaryOpKind::GtEq),
            ],
            &[
                (Symbol::Shl, BinaryOpKind::Shl),
                (Symbol::Shr, BinaryOpKind::Shr),
            ],
            &[
                (Symbol::Plus, BinaryOpKind::Add),
                (Symbol::Minus, BinaryOpKind::Sub),
            ],
            &[
                (Symbol::Star, BinaryOpKind::Mul),
                (Symbol::Slash, BinaryOpKind::Div),
                (Symbol::Percent, BinaryOpKind::Mod),
            ],
        ];
        if level == LEVELS.len() {
            return self.unary_expr();
        }
        let start = self
            .peek()
            .ok_or_else(|| self.err("expression"))?
            .range
            .start
            .clone();
        let mut lhs = self.binary_expr(level + 1)?;
        loop {
            let Some(&(sym, op)) = LEVELS[level].iter().find(|(sym, _)| self.check_sym(*sym))
            else {
                return Ok(lhs);
            };
            self.expect_sym(sym)?;
            let rhs = self.binary_expr(level + 1)?;
            lhs = self.node(
                NodeKind::BinaryOp { op, lhs, rhs },
                self.range_from(&start),
                &[lhs, rhs],
            );
        }
    }

    fn unary_expr(&mut self) -> Result<NodeId, ParseError> {
        const UNARY: &[(Symbol, UnaryOpKind)] = &[
            (Symbol::Bang, UnaryOpKind::LogicalNot),
            (Symbol::Tilde, UnaryOpKind::BitwiseNot),
            (Symbol::Minus, UnaryOpKind::Negate),
            (Symbol::Plus, UnaryOpKind::Identity),
            (Symbol::Pipe, UnaryOpKind::ReduceOr),
            (Symbol::Amp, UnaryOpKind::ReduceAnd),
            (Symbol::Caret, UnaryOpKind::ReduceXor),
        ];
        if let Some(&(sym, op)) = UNARY.iter().find(|(sym, _)| self.check_sym(*sym)) {
            let tok = self.expect_sym(sym)?;
            let start = tok.range.start.clone();
            let expr = self.unary_expr()?;
            return Ok(self.node(
                NodeKind::UnaryOp { op, expr },
                self.range_from(&start),
                &[expr],
            ));
        }
        self.primary()?.ok_or_else(|| self.err("expression"))
    }

    fn primary(&mut self) -> Result<Option<NodeId>, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Number) => {
                let tok = self.bump();
                let value = tok.number.clone().expect("number token carries literal");
                Ok(Some(
                    self.ast.alloc(NodeKind::Number { value }, tok.range.clone()),
                ))
            }
            Some(TokenKind::Str) => {
                let tok = self.bump();
                Ok(Some(self.ast.alloc(
                    NodeKind::Str {
                        value: tok.text.clone(),
                    },
                    tok.range.clone(),
                )))
            }
            Some(TokenKind::Id) => {
                let id = self.expect_id_node()?;
                if self.check_sym(Symbol::LBracket) {
                    Ok(Some(self.part_select(id)?))
                } else {
                    Ok(Some(id))
                }
            }
            Some(TokenKind::Sym(Symbol::LParen)) => {
                self.expect_sym(Symbol::LParen)?;
                let expr = self.expression()?;
                self.expect_sym(Symbol::RParen)?;
                Ok(Some(expr))
            }
            Some(TokenKind::Sym(Symbol::LBrace)) => {
                Ok(Some(self.concatenation_or_repetition()?))
            }
            _ => Ok(None),
        }
    }

    /// `x[i]`, `x[m:l]`, or `x[l+:n]` after the base identifier.
    fn part_select(&mut self, base: NodeId) -> Result<NodeId, ParseError> {
        let start = self.ast.range(base).start.clone();
        self.expect_sym(Symbol::LBracket)?;
        let a = self.expression()?;
        let (select, b) = if self.eat_sym(Symbol::Colon) {
            (SelectKind::Range, Some(self.expression()?))
        } else if self.eat_sym(Symbol::PlusColon) {
            (SelectKind::Plus, Some(self.expression()?))
        } else {
            (SelectKind::Single, None)
        };
        self.expect_sym(Symbol::RBracket)?;
        let children: Vec<_> = [base, a].into_iter().chain(b).collect();
        Ok(self.node(
            NodeKind::PartSelect { base, select, a, b },
            self.range_from(&start),
            &children,
        ))
    }

    /// `[msb:lsb]`
    fn bit_range(&mut self) -> Result<NodeId, ParseError> {
        let lbrack = self.expect_sym(Symbol::LBracket)?;
        let start = lbrack.range.start.clone();
        let msb = self.expression()?;
        self.expect_sym(Symbol::Colon)?;
        let lsb = self.expression()?;
        self.expect_sym(Symbol::RBracket)?;
        Ok(self.node(
            NodeKind::Range { msb, lsb },
            self.range_from(&start),
            &[msb, lsb],
        ))
    }

    fn range_opt(&mut self) -> Result<Option<NodeId>, ParseError> {
        if self.check_sym(Symbol::LBracket) {
            Ok(Some(self.bit_range()?))
        } else {
            Ok(None)
        }
    }

    /// After `{`: a concatenation `{a, b}` or repetition `{n{a, b}}`.
    fn concatenation_or_repetition(&mut self) -> Result<NodeId, ParseError> {
        let lbrace = self.expect_sym(Symbol::LBrace)?;
        let start = lbrace.range.start.clone();
        let first = self.expression()?;
        if self.check_sym(Symbol::LBrace) {
            let concat = self.concatenation_or_repetition()?;
            self.expect_sym(Symbol::RBrace)?;
            return Ok(self.node(
                NodeKind::Repetition {
                    count: first,
                    concat,
                },
                self.range_from(&start),
                &[first, concat],
            ));
        }
        let mut exprs = vec![first];
        while self.eat_sym(Symbol::Comma) {
            exprs.push(self.expression()?);
        }
        self.expect_sym(Symbol::RBrace)?;
        let children = exprs.clone();
        Ok(self.node(
            NodeKind::Concatenation { exprs },
            self.range_from(&start),
            &children,
        ))
    }
}

fn describe(tok: &Token) -> String {
    match tok.kind {
        TokenKind::Id | TokenKind::SysId | TokenKind::Number | TokenKind::Str => {
            format!("{} \"{}\"", tok.kind, tok.text)
        }
        kind => kind.to_string(),
    }
}
