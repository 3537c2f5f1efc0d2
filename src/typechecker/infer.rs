//! Expression and pattern checker: walks the AST, produces the
//! elaborated IR, and drives unification.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{
    self, Args, Body, CaseArm, Comp, CompArm, Expr, FormatSegment, FrozenArg, HoleCode, Literal,
    Params, Pattern, RecBinding, Span, TypeExpr,
};
use crate::interner::{self, Symbol};
use crate::ir::{BaseConst, IBranch, IExpr, IFrozenArg, IPattern, LocalName, Name, OptRow};
use crate::primitives::Primitives;
use crate::typechecker::context::Context;
use crate::typechecker::convert::{self, DecodeCtx};
use crate::typechecker::env::{CtorEntry, Env, ValEntry, ValName};
use crate::typechecker::error::{TypeError, Warning};
use crate::typechecker::poly;
use crate::typechecker::types::{
    BaseKindF, Domain, Effect, EffectF, FrozenF, LabelMap, MustBeBoundId, MustBeBoundRowId, Row,
    RowF, RowVar, Type, TypeF, TypeId,
};
use crate::typechecker::unify;

/// Ambient inference context of one binding: the current level and the
/// rigid parameters of the enclosing binder.
#[derive(Debug, Clone, Default)]
pub struct Pre {
    pub level: u32,
    pub type_params: HashMap<Symbol, MustBeBoundId>,
    pub row_params: HashMap<Symbol, MustBeBoundRowId>,
}

impl Pre {
    pub fn deeper(&self) -> Pre {
        Pre {
            level: self.level + 1,
            type_params: self.type_params.clone(),
            row_params: self.row_params.clone(),
        }
    }
}

/// Variables bound by a pattern, in binding order.
pub type BindingMap = Vec<(Symbol, LocalName, Type, Span)>;

/// The result of elaborating a lambda's parameter list.
struct BoundParams {
    env: Env,
    domain: Domain,
    ordered: Vec<LocalName>,
    mandatory: BTreeMap<Symbol, LocalName>,
    optional: BTreeMap<Symbol, (LocalName, Option<IExpr>)>,
}

pub struct Checker<'c> {
    pub ctx: &'c mut Context,
    pub prims: &'c Primitives,
}

impl<'c> Checker<'c> {
    pub fn new(ctx: &'c mut Context, prims: &'c Primitives) -> Self {
        Checker { ctx, prims }
    }

    fn unify(&mut self, span: Span, actual: &Type, expected: &Type) -> Result<(), TypeError> {
        unify::unify(self.ctx, span, actual, expected)
    }

    fn unify_effect(
        &mut self,
        span: Span,
        actual: &Effect,
        expected: &Effect,
    ) -> Result<(), TypeError> {
        unify::unify_effect(self.ctx, span, actual, expected)
    }

    fn list_of(&self, item: Type) -> Type {
        TypeF::Data(TypeId::Variant(self.prims.list), vec![item])
    }

    fn option_of(&self, item: Type) -> Type {
        TypeF::Data(TypeId::Variant(self.prims.option), vec![item])
    }

    fn format_of(&self, holes: Type) -> Type {
        TypeF::Data(TypeId::Variant(self.prims.format), vec![holes])
    }

    fn fresh_effect(&mut self, level: u32) -> Effect {
        EffectF(self.ctx.fresh_type_var(level))
    }

    // ===== Expressions =====

    pub fn infer(&mut self, pre: &Pre, env: &Env, expr: &Expr) -> Result<(IExpr, Type), TypeError> {
        match expr {
            Expr::Literal { span, lit } => {
                let (cnst, ty) = self.literal(pre, *span, lit)?;
                Ok((IExpr::BaseConst(cnst), ty))
            }
            Expr::Var { span, path, name } => self.infer_var(pre, env, *span, path, *name),
            Expr::Lambda { span: _, params, body } => {
                self.elaborate_function(pre, env, params, None, body, None)
            }
            Expr::Apply { span, callee, args } => self.infer_apply(pre, env, *span, callee, args),
            Expr::If {
                span,
                cond,
                then_branch,
                else_branch,
            } => self.infer_if(pre, env, *span, cond, then_branch, else_branch),
            Expr::Let {
                span,
                name,
                bound,
                body,
            } => self.infer_let(pre, env, *span, name, bound, body),
            Expr::LetRec { span: _, binds, body } => self.infer_letrec(pre, env, binds, body),
            Expr::Tuple { span: _, items } => {
                let mut irs = Vec::with_capacity(items.len());
                let mut tys = Vec::with_capacity(items.len());
                for item in items {
                    let (ir, ty) = self.infer(pre, env, item)?;
                    irs.push(ir);
                    tys.push(ty);
                }
                Ok((IExpr::Tuple(irs), TypeF::Product(tys)))
            }
            Expr::ListNil { .. } => {
                let item = self.ctx.fresh_type_var(pre.level);
                Ok((IExpr::ListNil, self.list_of(item)))
            }
            Expr::ListCons { span, head, tail } => {
                let (head_ir, head_ty) = self.infer(pre, env, head)?;
                let (tail_ir, tail_ty) = self.infer(pre, env, tail)?;
                let expected = self.list_of(head_ty);
                self.unify(*span, &tail_ty, &expected)?;
                Ok((
                    IExpr::ListCons {
                        head: Box::new(head_ir),
                        tail: Box::new(tail_ir),
                    },
                    tail_ty,
                ))
            }
            Expr::Record { span: _, fields } => {
                let mut irs = BTreeMap::new();
                let mut tys = LabelMap::new();
                for (label, value) in fields {
                    let (ir, ty) = self.infer(pre, env, value)?;
                    if tys.insert(label.value, ty).is_some() {
                        return Err(TypeError::DuplicatedLabel {
                            span: label.span,
                            label: label.value,
                        });
                    }
                    irs.insert(label.value, ir);
                }
                Ok((IExpr::Record(irs), TypeF::Record(tys)))
            }
            Expr::RecordAccess { span, expr, label } => {
                let (ir, record_ty) = self.infer(pre, env, expr)?;
                let field_ty = self.ctx.fresh_type_var(pre.level);
                let mut kind = LabelMap::new();
                kind.insert(label.value, field_ty.clone());
                let fid = self.ctx.fresh_free_id(pre.level, BaseKindF::Record(kind));
                self.unify(*span, &record_ty, &Type::free(fid))?;
                Ok((
                    IExpr::RecordAccess {
                        expr: Box::new(ir),
                        label: label.value,
                    },
                    field_ty,
                ))
            }
            Expr::RecordUpdate {
                span,
                expr,
                label,
                value,
            } => {
                let (ir, record_ty) = self.infer(pre, env, expr)?;
                let (value_ir, value_ty) = self.infer(pre, env, value)?;
                let mut kind = LabelMap::new();
                kind.insert(label.value, value_ty);
                let fid = self.ctx.fresh_free_id(pre.level, BaseKindF::Record(kind));
                self.unify(*span, &record_ty, &Type::free(fid))?;
                Ok((
                    IExpr::RecordUpdate {
                        expr: Box::new(ir),
                        label: label.value,
                        value: Box::new(value_ir),
                    },
                    record_ty,
                ))
            }
            Expr::Ctor {
                span,
                path,
                name,
                args,
            } => self.infer_ctor(pre, env, *span, path, *name, args),
            Expr::Case {
                span,
                scrutinee,
                arms,
            } => self.infer_case(pre, env, *span, scrutinee, arms),
            Expr::Freeze {
                span,
                path,
                name,
                args,
            } => self.infer_freeze(pre, env, *span, path, *name, args),
            Expr::FreezeUpdate { span, expr, args } => {
                self.infer_freeze_update(pre, env, *span, expr, args)
            }
        }
    }

    fn literal(
        &mut self,
        pre: &Pre,
        span: Span,
        lit: &Literal,
    ) -> Result<(BaseConst, Type), TypeError> {
        Ok(match lit {
            Literal::Unit => (BaseConst::Unit, Type::unit()),
            Literal::Bool(b) => (BaseConst::Bool(*b), Type::bool()),
            Literal::Int(n) => (BaseConst::Int(*n), Type::int()),
            Literal::Float(x) => (BaseConst::Float(*x), Type::float()),
            Literal::Char(c) => (BaseConst::Char(*c), Type::char()),
            Literal::Binary(raw) => {
                let mut bytes = Vec::with_capacity(raw.len());
                for value in raw {
                    let byte = u8::try_from(*value)
                        .map_err(|_| TypeError::InvalidByte { span, value: *value })?;
                    bytes.push(byte);
                }
                (BaseConst::Binary(bytes), Type::binary())
            }
            Literal::Format(segments) => {
                let mut holes = Vec::new();
                for segment in segments {
                    if let FormatSegment::Hole(code) = segment {
                        holes.push(match code {
                            HoleCode::Char => Type::char(),
                            HoleCode::Fixed | HoleCode::Scientific | HoleCode::General => {
                                Type::float()
                            }
                            HoleCode::Str => self.list_of(Type::char()),
                            HoleCode::Pretty | HoleCode::Write => {
                                self.ctx.fresh_type_var(pre.level)
                            }
                        });
                    }
                }
                let holes_ty = match holes.len() {
                    0 => Type::unit(),
                    1 => holes.into_iter().next().unwrap(),
                    _ => TypeF::Product(holes),
                };
                (BaseConst::Format(segments.clone()), self.format_of(holes_ty))
            }
        })
    }

    fn infer_var(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        path: &[ast::Ident],
        name: Symbol,
    ) -> Result<(IExpr, Type), TypeError> {
        let entry = self.lookup_val(env, span, path, name)?;
        let out_name = val_name(&entry);
        let ty = poly::instantiate(self.ctx, pre.level, &entry.pty);
        Ok((IExpr::Var(out_name), ty))
    }

    fn lookup_val(
        &self,
        env: &Env,
        span: Span,
        path: &[ast::Ident],
        name: Symbol,
    ) -> Result<ValEntry, TypeError> {
        let entry = match convert::resolve_path(env, path)? {
            None => env.find_val(name),
            Some(module) => module
                .sig
                .as_structure()
                .ok_or(TypeError::NotOfStructureType { span, name })?
                .find_val(name),
        };
        entry
            .cloned()
            .ok_or(TypeError::UnboundVariable { span, name })
    }

    fn lookup_ctor(
        &self,
        env: &Env,
        span: Span,
        path: &[ast::Ident],
        name: Symbol,
    ) -> Result<CtorEntry, TypeError> {
        let entry = match convert::resolve_path(env, path)? {
            None => env.find_ctor(name),
            Some(module) => module
                .sig
                .as_structure()
                .ok_or(TypeError::NotOfStructureType { span, name })?
                .find_ctor(name),
        };
        entry
            .cloned()
            .ok_or(TypeError::UndefinedConstructor { span, name })
    }

    // ----- lambdas -----

    fn bind_params(
        &mut self,
        pre: &Pre,
        env: &Env,
        params: &Params,
    ) -> Result<BoundParams, TypeError> {
        let mut inner = env.clone();
        let mut ordered_tys = Vec::new();
        let mut ordered_names = Vec::new();
        for param in &params.ordered {
            let ty = self.param_type(pre, env, param)?;
            let local = self.ctx.fresh_local_name(param.name.value);
            inner.add_val(
                param.name.value,
                ValEntry {
                    pty: poly::lift(&ty),
                    name: ValName::Local(local),
                },
            );
            ordered_tys.push(ty);
            ordered_names.push(local);
        }

        let mut mandatory_tys = LabelMap::new();
        let mut mandatory_names = BTreeMap::new();
        for labeled in &params.labeled {
            let ty = self.param_type(pre, env, &labeled.param)?;
            if mandatory_tys.insert(labeled.label.value, ty.clone()).is_some() {
                return Err(TypeError::DuplicatedLabel {
                    span: labeled.label.span,
                    label: labeled.label.value,
                });
            }
            let local = self.ctx.fresh_local_name(labeled.param.name.value);
            mandatory_names.insert(labeled.label.value, local);
            inner.add_val(
                labeled.param.name.value,
                ValEntry {
                    pty: poly::lift(&ty),
                    name: ValName::Local(local),
                },
            );
        }

        let mut optional_tys = LabelMap::new();
        let mut optional_names = BTreeMap::new();
        for optional in &params.optional {
            let inner_ty = self.param_type(pre, env, &optional.param)?;
            if optional_tys
                .insert(optional.label.value, inner_ty.clone())
                .is_some()
            {
                return Err(TypeError::DuplicatedLabel {
                    span: optional.label.span,
                    label: optional.label.value,
                });
            }
            let local = self.ctx.fresh_local_name(optional.param.name.value);
            // With a default the body sees the inner type; without one it
            // sees `option<T>`.
            let (body_ty, default_ir) = match &optional.default {
                Some(default) => {
                    let (default_ir, default_ty) = self.infer(pre, env, default)?;
                    self.unify(default.span(), &default_ty, &inner_ty)?;
                    (inner_ty.clone(), Some(default_ir))
                }
                None => (self.option_of(inner_ty.clone()), None),
            };
            optional_names.insert(optional.label.value, (local, default_ir));
            inner.add_val(
                optional.param.name.value,
                ValEntry {
                    pty: poly::lift(&body_ty),
                    name: ValName::Local(local),
                },
            );
        }

        Ok(BoundParams {
            env: inner,
            domain: Domain {
                ordered: ordered_tys,
                mandatory: mandatory_tys,
                optional: RowF::Fixed(optional_tys),
            },
            ordered: ordered_names,
            mandatory: mandatory_names,
            optional: optional_names,
        })
    }

    fn param_type(&mut self, pre: &Pre, env: &Env, param: &ast::Param) -> Result<Type, TypeError> {
        match &param.annot {
            Some(annot) => {
                let d = DecodeCtx {
                    env,
                    type_params: &pre.type_params,
                    row_params: &pre.row_params,
                };
                convert::decode_type(self.ctx, &d, annot)
            }
            None => Ok(self.ctx.fresh_type_var(pre.level)),
        }
    }

    /// Elaborates a function: parameters, optional return annotation,
    /// pure or effectful body. Shared between lambdas, `let rec`
    /// bindings, and module-level value bindings.
    pub fn elaborate_function(
        &mut self,
        pre: &Pre,
        env: &Env,
        params: &Params,
        ret: Option<&TypeExpr>,
        body: &Body,
        recursive: Option<LocalName>,
    ) -> Result<(IExpr, Type), TypeError> {
        let bound = self.bind_params(pre, env, params)?;
        let (body_ir, ty) = match body {
            Body::Pure(expr) => {
                let (body_ir, body_ty) = self.infer(pre, &bound.env, expr)?;
                if let Some(annot) = ret {
                    let expected = self.decode_annot(pre, env, annot)?;
                    self.unify(annot.span(), &body_ty, &expected)?;
                }
                (body_ir, Type::fun(bound.domain, body_ty))
            }
            Body::Effectful(comp) => {
                let (body_ir, eff, body_ty) = self.infer_comp(pre, &bound.env, comp)?;
                if let Some(annot) = ret {
                    let expected = self.decode_annot(pre, env, annot)?;
                    self.unify(annot.span(), &body_ty, &expected)?;
                }
                (body_ir, Type::eff(bound.domain, eff, body_ty))
            }
        };
        Ok((
            IExpr::Lambda {
                recursive,
                ordered: bound.ordered,
                mandatory: bound.mandatory,
                optional: bound.optional,
                body: Box::new(body_ir),
            },
            ty,
        ))
    }

    fn decode_annot(
        &mut self,
        pre: &Pre,
        env: &Env,
        annot: &TypeExpr,
    ) -> Result<Type, TypeError> {
        let d = DecodeCtx {
            env,
            type_params: &pre.type_params,
            row_params: &pre.row_params,
        };
        convert::decode_type(self.ctx, &d, annot)
    }

    // ----- application -----

    fn infer_apply(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        callee: &Expr,
        args: &Args,
    ) -> Result<(IExpr, Type), TypeError> {
        let (callee_ir, callee_ty) = self.infer(pre, env, callee)?;
        let head = self.ctx.head(&callee_ty);
        let (ordered, mandatory, optional, domain, codomain) = match head {
            // The callee's shape is already known: check the arguments
            // against it so label mistakes surface precisely.
            TypeF::Fun(domain, codomain) => {
                let (ordered, mandatory, optional) =
                    self.check_args(pre, env, span, args, &domain)?;
                (ordered, mandatory, optional, *domain, *codomain)
            }
            _ => {
                let (domain, ordered, mandatory, optional) = self.infer_actuals(pre, env, args)?;
                let codomain = self.ctx.fresh_type_var(pre.level);
                let expected = Type::fun(domain.clone(), codomain.clone());
                self.unify(span, &callee_ty, &expected)?;
                (ordered, mandatory, optional, domain, codomain)
            }
        };
        let opt_row = self.resolved_opt_row(&domain.optional);
        let ir = self.make_apply(callee_ir, opt_row, ordered, mandatory, optional);
        Ok((ir, codomain))
    }

    /// Infers the actual arguments of a call whose callee shape is not
    /// yet known, building a domain for it. The optional part is a
    /// fresh row constrained by the supplied labels, so the callee may
    /// accept more optionals than this call site provides.
    #[allow(clippy::type_complexity)]
    fn infer_actuals(
        &mut self,
        pre: &Pre,
        env: &Env,
        args: &Args,
    ) -> Result<
        (
            Domain,
            Vec<IExpr>,
            BTreeMap<Symbol, IExpr>,
            BTreeMap<Symbol, IExpr>,
        ),
        TypeError,
    > {
        let mut ordered = Vec::new();
        let mut ordered_irs = Vec::new();
        for arg in &args.ordered {
            let (ir, ty) = self.infer(pre, env, arg)?;
            ordered.push(ty);
            ordered_irs.push(ir);
        }
        let mut mandatory = LabelMap::new();
        let mut mandatory_irs = BTreeMap::new();
        for (label, arg) in &args.labeled {
            let (ir, ty) = self.infer(pre, env, arg)?;
            if mandatory.insert(label.value, ty).is_some() {
                return Err(TypeError::DuplicatedLabel {
                    span: label.span,
                    label: label.value,
                });
            }
            mandatory_irs.insert(label.value, ir);
        }
        let mut optional_kind = LabelMap::new();
        let mut optional_irs = BTreeMap::new();
        for (label, arg) in &args.optional {
            let (ir, ty) = self.infer(pre, env, arg)?;
            if optional_kind.insert(label.value, ty).is_some() {
                return Err(TypeError::DuplicatedLabel {
                    span: label.span,
                    label: label.value,
                });
            }
            optional_irs.insert(label.value, ir);
        }
        let optional = self.ctx.fresh_row_var(pre.level, optional_kind);
        Ok((
            Domain {
                ordered,
                mandatory,
                optional,
            },
            ordered_irs,
            mandatory_irs,
            optional_irs,
        ))
    }

    /// Checks the arguments of a call against a known domain.
    fn check_args(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        args: &Args,
        domain: &Domain,
    ) -> Result<(Vec<IExpr>, BTreeMap<Symbol, IExpr>, BTreeMap<Symbol, IExpr>), TypeError> {
        if args.ordered.len() != domain.ordered.len() {
            return Err(TypeError::BadArityOfOrderedArguments {
                span,
                expected: domain.ordered.len(),
                found: args.ordered.len(),
            });
        }
        let mut ordered = Vec::with_capacity(args.ordered.len());
        for (arg, expected) in args.ordered.iter().zip(&domain.ordered) {
            let (ir, ty) = self.infer(pre, env, arg)?;
            self.unify(arg.span(), &ty, expected)?;
            ordered.push(ir);
        }

        let mut mandatory = BTreeMap::new();
        for (label, arg) in &args.labeled {
            let Some(expected) = domain.mandatory.get(&label.value) else {
                return Err(TypeError::UnexpectedMandatoryLabel {
                    span: label.span,
                    label: label.value,
                });
            };
            let expected = expected.clone();
            let (ir, ty) = self.infer(pre, env, arg)?;
            self.unify(arg.span(), &ty, &expected)?;
            if mandatory.insert(label.value, ir).is_some() {
                return Err(TypeError::DuplicatedLabel {
                    span: label.span,
                    label: label.value,
                });
            }
        }
        for label in domain.mandatory.keys() {
            if !mandatory.contains_key(label) {
                return Err(TypeError::MissingMandatoryLabel {
                    span,
                    label: *label,
                });
            }
        }

        let mut optional = BTreeMap::new();
        for (label, arg) in &args.optional {
            let (ir, ty) = self.infer(pre, env, arg)?;
            self.check_optional_arg(&domain.optional, label, &ty)?;
            if optional.insert(label.value, ir).is_some() {
                return Err(TypeError::DuplicatedLabel {
                    span: label.span,
                    label: label.value,
                });
            }
        }

        Ok((ordered, mandatory, optional))
    }

    /// Checks one optional argument against the callee's optional row;
    /// a free row is extended with the surplus label.
    fn check_optional_arg(
        &mut self,
        row: &Row,
        label: &ast::Ident,
        ty: &Type,
    ) -> Result<(), TypeError> {
        match self.ctx.row_head(row) {
            RowF::Fixed(fields) => match fields.get(&label.value) {
                Some(expected) => {
                    let expected = expected.clone();
                    self.unify(label.span, ty, &expected)
                }
                None => Err(TypeError::UnexpectedOptionalLabel {
                    span: label.span,
                    label: label.value,
                }),
            },
            RowF::Var(RowVar::Free(frid)) => {
                let mut kind = self.ctx.rv_kind(frid);
                match kind.get(&label.value) {
                    Some(expected) => {
                        let expected = expected.clone();
                        self.unify(label.span, ty, &expected)
                    }
                    None => {
                        kind.insert(label.value, ty.clone());
                        self.ctx.set_rv_kind(frid, kind);
                        Ok(())
                    }
                }
            }
            RowF::Var(RowVar::MustBeBound(mbbrid)) => {
                let kind = self.ctx.bound_row_kind(mbbrid.0).clone();
                match kind.get(&label.value).and_then(poly::poly_to_mono) {
                    Some(expected) => self.unify(label.span, ty, &expected),
                    None => Err(TypeError::UnexpectedOptionalLabel {
                        span: label.span,
                        label: label.value,
                    }),
                }
            }
        }
    }

    fn resolved_opt_row(&mut self, row: &Row) -> OptRow {
        match self.ctx.row_head(row) {
            RowF::Fixed(fields) => OptRow::Fixed(fields.keys().copied().collect()),
            RowF::Var(_) => OptRow::Open,
        }
    }

    fn make_apply(
        &mut self,
        callee_ir: IExpr,
        opt_row: OptRow,
        ordered: Vec<IExpr>,
        mandatory: BTreeMap<Symbol, IExpr>,
        optional: BTreeMap<Symbol, IExpr>,
    ) -> IExpr {
        match callee_ir {
            IExpr::Var(name) => IExpr::Apply {
                callee: name,
                opt_row,
                ordered,
                mandatory,
                optional,
            },
            other => {
                let temp = self.ctx.fresh_local_name(interner::intern("$callee"));
                IExpr::LetIn {
                    name: temp,
                    bound: Box::new(other),
                    body: Box::new(IExpr::Apply {
                        callee: Name::Local(temp),
                        opt_row,
                        ordered,
                        mandatory,
                        optional,
                    }),
                }
            }
        }
    }

    // ----- branching -----

    fn infer_if(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        cond: &Expr,
        then_branch: &Expr,
        else_branch: &Expr,
    ) -> Result<(IExpr, Type), TypeError> {
        let (cond_ir, cond_ty) = self.infer(pre, env, cond)?;
        self.unify(cond.span(), &cond_ty, &Type::bool())?;
        let (then_ir, then_ty) = self.infer(pre, env, then_branch)?;
        let (else_ir, else_ty) = self.infer(pre, env, else_branch)?;
        self.unify(span, &then_ty, &else_ty)?;
        Ok((if_to_case(cond_ir, then_ir, else_ir), then_ty))
    }

    fn infer_let(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        name: &ast::Ident,
        bound: &Expr,
        body: &Expr,
    ) -> Result<(IExpr, Type), TypeError> {
        let deeper = pre.deeper();
        let (bound_ir, bound_ty) = self.infer(&deeper, env, bound)?;
        let pty = poly::generalize(self.ctx, span, pre.level, &bound_ty)?;
        let local = self.ctx.fresh_local_name(name.value);
        let mut inner = env.clone();
        inner.add_val(
            name.value,
            ValEntry {
                pty,
                name: ValName::Local(local),
            },
        );
        let (body_ir, body_ty) = self.infer(pre, &inner, body)?;
        if !body_ir.uses_local(local) {
            self.ctx.push_warning(Warning::UnusedVariable {
                span: name.span,
                name: name.value,
            });
        }
        Ok((
            IExpr::LetIn {
                name: local,
                bound: Box::new(bound_ir),
                body: Box::new(body_ir),
            },
            body_ty,
        ))
    }

    fn infer_letrec(
        &mut self,
        pre: &Pre,
        env: &Env,
        binds: &[RecBinding],
        body: &Expr,
    ) -> Result<(IExpr, Type), TypeError> {
        let deeper = pre.deeper();
        let mut inner = env.clone();
        let mut locals = Vec::with_capacity(binds.len());
        let mut placeholders = Vec::with_capacity(binds.len());
        for bind in binds {
            let local = self.ctx.fresh_local_name(bind.name.value);
            let ty = self.ctx.fresh_type_var(deeper.level);
            inner.add_val(
                bind.name.value,
                ValEntry {
                    pty: poly::lift(&ty),
                    name: ValName::Local(local),
                },
            );
            locals.push(local);
            placeholders.push(ty);
        }

        let mut lambdas = Vec::with_capacity(binds.len());
        for (bind, placeholder) in binds.iter().zip(&placeholders) {
            let (ir, ty) = self.elaborate_function(
                &deeper,
                &inner,
                &bind.params,
                bind.ret.as_ref(),
                &bind.body,
                None,
            )?;
            self.unify(bind.span, &ty, placeholder)?;
            lambdas.push(ir);
        }

        let mut outer = env.clone();
        for ((bind, local), placeholder) in binds.iter().zip(&locals).zip(&placeholders) {
            let pty = poly::generalize(self.ctx, bind.span, pre.level, placeholder)?;
            outer.add_val(
                bind.name.value,
                ValEntry {
                    pty,
                    name: ValName::Local(*local),
                },
            );
        }
        let (body_ir, body_ty) = self.infer(pre, &outer, body)?;
        Ok((self.compile_rec_group(locals, lambdas, body_ir), body_ty))
    }

    /// Lowers a recursive group. A single binding becomes a
    /// self-referencing lambda; a multi-binding group becomes one
    /// tuple-returning self-recursive closure that every binding (and
    /// the continuation) projects from.
    fn compile_rec_group(
        &mut self,
        locals: Vec<LocalName>,
        lambdas: Vec<IExpr>,
        rest: IExpr,
    ) -> IExpr {
        if locals.len() == 1 {
            let local = locals[0];
            let lambda = set_recursive(lambdas.into_iter().next().unwrap(), local);
            return IExpr::LetIn {
                name: local,
                bound: Box::new(lambda),
                body: Box::new(rest),
            };
        }

        let group_self = self.ctx.fresh_local_name(interner::intern("$group"));
        let tuple_pat =
            IPattern::Tuple(locals.iter().map(|local| IPattern::Var(*local)).collect());
        let empty_call = |callee: LocalName| IExpr::Apply {
            callee: Name::Local(callee),
            opt_row: OptRow::Fixed(vec![]),
            ordered: vec![],
            mandatory: BTreeMap::new(),
            optional: BTreeMap::new(),
        };

        let wrapped: Vec<IExpr> = lambdas
            .into_iter()
            .map(|lambda| match lambda {
                IExpr::Lambda {
                    recursive,
                    ordered,
                    mandatory,
                    optional,
                    body,
                } => IExpr::Lambda {
                    recursive,
                    ordered,
                    mandatory,
                    optional,
                    body: Box::new(IExpr::Case {
                        scrutinee: Box::new(empty_call(group_self)),
                        branches: vec![IBranch {
                            pattern: tuple_pat.clone(),
                            body: *body,
                        }],
                    }),
                },
                other => other,
            })
            .collect();

        let closure = IExpr::Lambda {
            recursive: Some(group_self),
            ordered: vec![],
            mandatory: BTreeMap::new(),
            optional: BTreeMap::new(),
            body: Box::new(IExpr::Tuple(wrapped)),
        };
        let group = self.ctx.fresh_local_name(interner::intern("$group"));
        IExpr::LetIn {
            name: group,
            bound: Box::new(closure),
            body: Box::new(IExpr::Case {
                scrutinee: Box::new(empty_call(group)),
                branches: vec![IBranch {
                    pattern: tuple_pat,
                    body: rest,
                }],
            }),
        }
    }

    // ----- data -----

    fn infer_ctor(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        path: &[ast::Ident],
        name: Symbol,
        args: &[Expr],
    ) -> Result<(IExpr, Type), TypeError> {
        let entry = self.lookup_ctor(env, span, path, name)?;
        let (fresh_args, param_tys) =
            poly::instantiate_scheme(self.ctx, pre.level, &entry.params, &entry.arg_types);
        if args.len() != param_tys.len() {
            return Err(TypeError::InvalidNumberOfConstructorArguments {
                span,
                name,
                expected: param_tys.len(),
                found: args.len(),
            });
        }
        let mut irs = Vec::with_capacity(args.len());
        for (arg, expected) in args.iter().zip(&param_tys) {
            let (ir, ty) = self.infer(pre, env, arg)?;
            self.unify(arg.span(), &ty, expected)?;
            irs.push(ir);
        }
        Ok((
            IExpr::Constructor {
                id: entry.ctor,
                args: irs,
            },
            TypeF::Data(TypeId::Variant(entry.variant), fresh_args),
        ))
    }

    fn infer_case(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        scrutinee: &Expr,
        arms: &[CaseArm],
    ) -> Result<(IExpr, Type), TypeError> {
        let (scrutinee_ir, scrutinee_ty) = self.infer(pre, env, scrutinee)?;
        let result_ty = self.ctx.fresh_type_var(pre.level);
        let mut branches = Vec::with_capacity(arms.len());
        for arm in arms {
            let (pattern, pattern_ty, bindings) = self.pattern(pre, env, &arm.pattern)?;
            self.unify(arm.pattern.span(), &pattern_ty, &scrutinee_ty)?;
            let inner = env_with_bindings(env, &bindings);
            let (body_ir, body_ty) = self.infer(pre, &inner, &arm.body)?;
            self.unify(span, &body_ty, &result_ty)?;
            branches.push(IBranch {
                pattern,
                body: body_ir,
            });
        }
        Ok((
            IExpr::Case {
                scrutinee: Box::new(scrutinee_ir),
                branches,
            },
            result_ty,
        ))
    }

    // ----- freezing -----

    fn infer_freeze(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        path: &[ast::Ident],
        name: Symbol,
        args: &[FrozenArg],
    ) -> Result<(IExpr, Type), TypeError> {
        let entry = self.lookup_val(env, span, path, name)?;
        let ValName::Global(gname) = entry.name else {
            return Err(TypeError::CannotFreezeNonGlobalName { span, name });
        };
        let ty = poly::instantiate(self.ctx, pre.level, &entry.pty);
        let (domain, eff, codomain) = self.effectful_parts(pre, span, &ty, args.len())?;

        let (irs, rest_ordered) = self.freeze_args(pre, env, args, &domain.ordered)?;
        let rest = Domain {
            ordered: rest_ordered,
            mandatory: LabelMap::new(),
            optional: domain.optional.clone(),
        };
        if let Some(label) = domain.mandatory.keys().next() {
            return Err(TypeError::MissingMandatoryLabel {
                span,
                label: *label,
            });
        }
        Ok((
            IExpr::Freeze {
                name: gname,
                args: irs,
            },
            TypeF::Frozen(Box::new(FrozenF {
                rest,
                recv: eff.0,
                ret: codomain,
            })),
        ))
    }

    fn infer_freeze_update(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        expr: &Expr,
        args: &[FrozenArg],
    ) -> Result<(IExpr, Type), TypeError> {
        let (ir, ty) = self.infer(pre, env, expr)?;
        let frozen = match self.ctx.head(&ty) {
            TypeF::Frozen(frozen) => *frozen,
            _ => {
                let rest = Domain {
                    ordered: (0..args.len())
                        .map(|_| self.ctx.fresh_type_var(pre.level))
                        .collect(),
                    mandatory: LabelMap::new(),
                    optional: self.ctx.fresh_row_var(pre.level, LabelMap::new()),
                };
                let frozen = FrozenF {
                    rest,
                    recv: self.ctx.fresh_type_var(pre.level),
                    ret: self.ctx.fresh_type_var(pre.level),
                };
                let expected = TypeF::Frozen(Box::new(frozen.clone()));
                self.unify(span, &ty, &expected)?;
                frozen
            }
        };
        if args.len() != frozen.rest.ordered.len() {
            return Err(TypeError::BadArityOfOrderedArguments {
                span,
                expected: frozen.rest.ordered.len(),
                found: args.len(),
            });
        }
        let (irs, rest_ordered) = self.freeze_args(pre, env, args, &frozen.rest.ordered)?;
        let rest = Domain {
            ordered: rest_ordered,
            mandatory: LabelMap::new(),
            optional: frozen.rest.optional.clone(),
        };
        Ok((
            IExpr::FreezeUpdate {
                expr: Box::new(ir),
                args: irs,
            },
            TypeF::Frozen(Box::new(FrozenF {
                rest,
                recv: frozen.recv,
                ret: frozen.ret,
            })),
        ))
    }

    /// Checks freeze arguments positionally against the expected ordered
    /// types; holes keep their expected type and stay in `rest`.
    fn freeze_args(
        &mut self,
        pre: &Pre,
        env: &Env,
        args: &[FrozenArg],
        expected: &[Type],
    ) -> Result<(Vec<IFrozenArg>, Vec<Type>), TypeError> {
        let mut irs = Vec::with_capacity(args.len());
        let mut rest = Vec::new();
        for (arg, expected_ty) in args.iter().zip(expected) {
            match arg {
                FrozenArg::Given(e) => {
                    let (ir, ty) = self.infer(pre, env, e)?;
                    self.unify(e.span(), &ty, expected_ty)?;
                    irs.push(IFrozenArg::Given(ir));
                }
                FrozenArg::Hole(_) => {
                    rest.push(expected_ty.clone());
                    irs.push(IFrozenArg::Hole);
                }
            }
        }
        Ok((irs, rest))
    }

    /// Resolves a type to its effectful-function parts, constraining an
    /// unknown callee to an effectful function of the right arity.
    fn effectful_parts(
        &mut self,
        pre: &Pre,
        span: Span,
        ty: &Type,
        arity: usize,
    ) -> Result<(Domain, Effect, Type), TypeError> {
        match self.ctx.head(ty) {
            TypeF::Eff(domain, eff, codomain) => {
                if domain.ordered.len() != arity {
                    return Err(TypeError::BadArityOfOrderedArguments {
                        span,
                        expected: domain.ordered.len(),
                        found: arity,
                    });
                }
                Ok((*domain, *eff, *codomain))
            }
            _ => {
                let domain = Domain {
                    ordered: (0..arity)
                        .map(|_| self.ctx.fresh_type_var(pre.level))
                        .collect(),
                    mandatory: LabelMap::new(),
                    optional: self.ctx.fresh_row_var(pre.level, LabelMap::new()),
                };
                let eff = self.fresh_effect(pre.level);
                let codomain = self.ctx.fresh_type_var(pre.level);
                let expected = Type::eff(domain.clone(), eff.clone(), codomain.clone());
                self.unify(span, ty, &expected)?;
                Ok((domain, eff, codomain))
            }
        }
    }

    // ===== Computations =====

    pub fn infer_comp(
        &mut self,
        pre: &Pre,
        env: &Env,
        comp: &Comp,
    ) -> Result<(IExpr, Effect, Type), TypeError> {
        match comp {
            Comp::Apply { span, callee, args } => {
                self.infer_comp_apply(pre, env, *span, callee, args)
            }
            Comp::Receive { span, arms } => self.infer_receive(pre, env, *span, arms),
            Comp::Do {
                span,
                binder,
                bound,
                body,
            } => {
                let (bound_ir, bound_eff, bound_ty) = self.infer_comp(pre, env, bound)?;
                let (local, inner) = match binder {
                    Some(name) => {
                        let local = self.ctx.fresh_local_name(name.value);
                        let mut inner = env.clone();
                        // The binder is monomorphic: the computation's
                        // type is lifted, never generalized.
                        inner.add_val(
                            name.value,
                            ValEntry {
                                pty: poly::lift(&bound_ty),
                                name: ValName::Local(local),
                            },
                        );
                        (local, inner)
                    }
                    None => (
                        self.ctx.fresh_local_name(interner::intern("_")),
                        env.clone(),
                    ),
                };
                let (body_ir, body_eff, body_ty) = self.infer_comp(pre, &inner, body)?;
                self.unify_effect(*span, &body_eff, &bound_eff)?;
                Ok((
                    IExpr::LetIn {
                        name: local,
                        bound: Box::new(bound_ir),
                        body: Box::new(body_ir),
                    },
                    bound_eff,
                    body_ty,
                ))
            }
            Comp::If {
                span,
                cond,
                then_branch,
                else_branch,
            } => {
                let (cond_ir, cond_ty) = self.infer(pre, env, cond)?;
                self.unify(cond.span(), &cond_ty, &Type::bool())?;
                let (then_ir, then_eff, then_ty) = self.infer_comp(pre, env, then_branch)?;
                let (else_ir, else_eff, else_ty) = self.infer_comp(pre, env, else_branch)?;
                self.unify_effect(*span, &else_eff, &then_eff)?;
                self.unify(*span, &then_ty, &else_ty)?;
                Ok((if_to_case(cond_ir, then_ir, else_ir), then_eff, then_ty))
            }
            Comp::Case {
                span,
                scrutinee,
                arms,
            } => {
                let (scrutinee_ir, scrutinee_ty) = self.infer(pre, env, scrutinee)?;
                let eff = self.fresh_effect(pre.level);
                let result_ty = self.ctx.fresh_type_var(pre.level);
                let branches =
                    self.comp_arms(pre, env, *span, arms, &scrutinee_ty, &eff, &result_ty)?;
                Ok((
                    IExpr::Case {
                        scrutinee: Box::new(scrutinee_ir),
                        branches,
                    },
                    eff,
                    result_ty,
                ))
            }
        }
    }

    fn infer_comp_apply(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        callee: &Expr,
        args: &Args,
    ) -> Result<(IExpr, Effect, Type), TypeError> {
        let (callee_ir, callee_ty) = self.infer(pre, env, callee)?;
        let head = self.ctx.head(&callee_ty);
        let (ordered, mandatory, optional, domain, eff, codomain) = match head {
            TypeF::Eff(domain, eff, codomain) => {
                let (ordered, mandatory, optional) =
                    self.check_args(pre, env, span, args, &domain)?;
                (ordered, mandatory, optional, *domain, *eff, *codomain)
            }
            _ => {
                let (domain, ordered, mandatory, optional) = self.infer_actuals(pre, env, args)?;
                let eff = self.fresh_effect(pre.level);
                let codomain = self.ctx.fresh_type_var(pre.level);
                let expected = Type::eff(domain.clone(), eff.clone(), codomain.clone());
                self.unify(span, &callee_ty, &expected)?;
                (ordered, mandatory, optional, domain, eff, codomain)
            }
        };
        let opt_row = self.resolved_opt_row(&domain.optional);
        let ir = self.make_apply(callee_ir, opt_row, ordered, mandatory, optional);
        Ok((ir, eff, codomain))
    }

    /// A `receive` constrains the enclosing process: every arm pattern
    /// has the receive type, and every arm body runs at the same effect.
    fn infer_receive(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        arms: &[CompArm],
    ) -> Result<(IExpr, Effect, Type), TypeError> {
        let recv_ty = self.ctx.fresh_type_var(pre.level);
        let eff = EffectF(recv_ty.clone());
        let result_ty = self.ctx.fresh_type_var(pre.level);
        let branches = self.comp_arms(pre, env, span, arms, &recv_ty, &eff, &result_ty)?;
        Ok((IExpr::Receive { branches }, eff, result_ty))
    }

    fn comp_arms(
        &mut self,
        pre: &Pre,
        env: &Env,
        span: Span,
        arms: &[CompArm],
        scrutinee_ty: &Type,
        eff: &Effect,
        result_ty: &Type,
    ) -> Result<Vec<IBranch>, TypeError> {
        let mut branches = Vec::with_capacity(arms.len());
        for arm in arms {
            let (pattern, pattern_ty, bindings) = self.pattern(pre, env, &arm.pattern)?;
            self.unify(arm.pattern.span(), &pattern_ty, scrutinee_ty)?;
            let inner = env_with_bindings(env, &bindings);
            let (body_ir, body_eff, body_ty) = self.infer_comp(pre, &inner, &arm.body)?;
            self.unify_effect(arm.span, &body_eff, eff)?;
            self.unify(span, &body_ty, result_ty)?;
            branches.push(IBranch {
                pattern,
                body: body_ir,
            });
        }
        Ok(branches)
    }

    // ===== Patterns =====

    /// Types a pattern, producing its IR form, its type, and the map of
    /// bound names. A name bound twice within one pattern is an error.
    pub fn pattern(
        &mut self,
        pre: &Pre,
        env: &Env,
        pattern: &Pattern,
    ) -> Result<(IPattern, Type, BindingMap), TypeError> {
        match pattern {
            Pattern::Wildcard { .. } => Ok((
                IPattern::Wildcard,
                self.ctx.fresh_type_var(pre.level),
                Vec::new(),
            )),
            Pattern::Var { span, name } => {
                let local = self.ctx.fresh_local_name(*name);
                let ty = self.ctx.fresh_type_var(pre.level);
                Ok((
                    IPattern::Var(local),
                    ty.clone(),
                    vec![(*name, local, ty, *span)],
                ))
            }
            Pattern::Literal { span, lit } => {
                let (cnst, ty) = self.literal(pre, *span, lit)?;
                Ok((IPattern::BaseConst(cnst), ty, Vec::new()))
            }
            Pattern::Tuple { span: _, items } => {
                let mut pats = Vec::with_capacity(items.len());
                let mut tys = Vec::with_capacity(items.len());
                let mut bindings = BindingMap::new();
                for item in items {
                    let (pat, ty, binds) = self.pattern(pre, env, item)?;
                    merge_bindings(&mut bindings, binds)?;
                    pats.push(pat);
                    tys.push(ty);
                }
                Ok((IPattern::Tuple(pats), TypeF::Product(tys), bindings))
            }
            Pattern::ListNil { .. } => {
                let item = self.ctx.fresh_type_var(pre.level);
                Ok((IPattern::ListNil, self.list_of(item), Vec::new()))
            }
            Pattern::ListCons { span, head, tail } => {
                let (head_pat, head_ty, mut bindings) = self.pattern(pre, env, head)?;
                let (tail_pat, tail_ty, tail_binds) = self.pattern(pre, env, tail)?;
                merge_bindings(&mut bindings, tail_binds)?;
                let expected = self.list_of(head_ty);
                self.unify(*span, &tail_ty, &expected)?;
                Ok((
                    IPattern::ListCons(Box::new(head_pat), Box::new(tail_pat)),
                    tail_ty,
                    bindings,
                ))
            }
            Pattern::Ctor {
                span,
                path,
                name,
                args,
            } => {
                let entry = self.lookup_ctor(env, *span, path, *name)?;
                let (fresh_args, param_tys) =
                    poly::instantiate_scheme(self.ctx, pre.level, &entry.params, &entry.arg_types);
                if args.len() != param_tys.len() {
                    return Err(TypeError::InvalidNumberOfConstructorArguments {
                        span: *span,
                        name: *name,
                        expected: param_tys.len(),
                        found: args.len(),
                    });
                }
                let mut pats = Vec::with_capacity(args.len());
                let mut bindings = BindingMap::new();
                for (arg, expected) in args.iter().zip(&param_tys) {
                    let (pat, ty, binds) = self.pattern(pre, env, arg)?;
                    merge_bindings(&mut bindings, binds)?;
                    self.unify(arg.span(), &ty, expected)?;
                    pats.push(pat);
                }
                Ok((
                    IPattern::Constructor(entry.ctor, pats),
                    TypeF::Data(TypeId::Variant(entry.variant), fresh_args),
                    bindings,
                ))
            }
        }
    }
}

/// Extends an environment with pattern bindings, each monomorphic.
pub fn env_with_bindings(env: &Env, bindings: &BindingMap) -> Env {
    let mut inner = env.clone();
    for (name, local, ty, _) in bindings {
        inner.add_val(
            *name,
            ValEntry {
                pty: poly::lift(ty),
                name: ValName::Local(*local),
            },
        );
    }
    inner
}

fn merge_bindings(acc: &mut BindingMap, more: BindingMap) -> Result<(), TypeError> {
    for (name, local, ty, span) in more {
        if acc.iter().any(|(seen, _, _, _)| *seen == name) {
            return Err(TypeError::BoundMoreThanOnceInPattern { span, name });
        }
        acc.push((name, local, ty, span));
    }
    Ok(())
}

fn val_name(entry: &ValEntry) -> Name {
    match entry.name {
        ValName::Global(gname) => Name::Global(gname),
        ValName::Local(lname) => Name::Local(lname),
    }
}

/// The target has no dedicated conditional; `if` lowers to a boolean
/// case.
fn if_to_case(cond: IExpr, then_ir: IExpr, else_ir: IExpr) -> IExpr {
    IExpr::Case {
        scrutinee: Box::new(cond),
        branches: vec![
            IBranch {
                pattern: IPattern::BaseConst(BaseConst::Bool(true)),
                body: then_ir,
            },
            IBranch {
                pattern: IPattern::BaseConst(BaseConst::Bool(false)),
                body: else_ir,
            },
        ],
    }
}

fn set_recursive(lambda: IExpr, local: LocalName) -> IExpr {
    match lambda {
        IExpr::Lambda {
            ordered,
            mandatory,
            optional,
            body,
            ..
        } => IExpr::Lambda {
            recursive: Some(local),
            ordered,
            mandatory,
            optional,
            body,
        },
        other => other,
    }
}
