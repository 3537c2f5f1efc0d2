//! Module elaborator: structures, functors, projections, `include`,
//! `with type`, and signature ascription.

use std::collections::BTreeSet;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{
    self, Bind, BindKind, Body, ModExpr, SigDecl, SigExpr, Span, TypeDefBinding, TypeDefBody,
    ValBinding,
};
use crate::interner::{self, intern, Symbol};
use crate::ir::IBind;
use crate::primitives::Primitives;
use crate::typechecker::context::{Context, CtorDef, SynonymDef, VariantDef};
use crate::typechecker::convert::{self, DecodeCtx};
use crate::typechecker::env::{
    AbstractedSig, CtorEntry, Env, FunctorClosure, FunctorSig, ModuleEntry, Namespace, SigEntry,
    SigRecord, Signature, TypeEntry, ValEntry, ValName,
};
use crate::typechecker::error::TypeError;
use crate::typechecker::infer::{Checker, Pre};
use crate::typechecker::poly;
use crate::typechecker::subtype::{self, WitnessMap};
use crate::typechecker::types::{
    BaseKindF, OpaqueId, PolyType, TypeF, TypeId,
};
use crate::typechecker::unify;

pub struct ModuleChecker<'c> {
    pub ctx: &'c mut Context,
    pub prims: &'c Primitives,
}

/// Output space derived from a module path.
pub fn space_of(addr: &[Symbol]) -> Symbol {
    let joined = addr
        .iter()
        .map(|part| interner::name_of(*part))
        .collect::<Vec<_>>()
        .join(".");
    intern(&joined)
}

fn full_name(addr: &[Symbol], name: Symbol) -> Symbol {
    let mut path = addr.to_vec();
    path.push(name);
    space_of(&path)
}

fn validate_value_ident(span: Span, name: Symbol) -> Result<(), TypeError> {
    let s = interner::name_of(name);
    let mut chars = s.chars();
    let ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(TypeError::InvalidIdentifier { span, name })
    }
}

fn validate_upper_ident(span: Span, name: Symbol) -> Result<(), TypeError> {
    let s = interner::name_of(name);
    let mut chars = s.chars();
    let ok = matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(TypeError::InvalidIdentifier { span, name })
    }
}

fn insert_entry(
    record: &mut SigRecord,
    span: Span,
    ns: Namespace,
    name: Symbol,
    entry: SigEntry,
) -> Result<(), TypeError> {
    record
        .insert(ns, name, entry)
        .map_err(|name| TypeError::ConflictInSignature { span, name })
}

fn poly_arity(pty: &PolyType) -> u32 {
    match pty {
        TypeF::Fun(domain, _) | TypeF::Eff(domain, _, _) => domain.ordered.len() as u32,
        _ => 0,
    }
}

impl<'c> ModuleChecker<'c> {
    pub fn new(ctx: &'c mut Context, prims: &'c Primitives) -> Self {
        ModuleChecker { ctx, prims }
    }

    // ===== Module expressions =====

    pub fn typecheck_module(
        &mut self,
        addr: &[Symbol],
        env: &Env,
        modex: &ModExpr,
    ) -> Result<(AbstractedSig, Vec<IBind>), TypeError> {
        log::debug!(
            "elaborating module expression at {}",
            interner::name_of(space_of(addr))
        );
        match modex {
            ModExpr::Var { span, name } => {
                let entry = env.find_module(*name).ok_or(TypeError::UnboundModuleName {
                    span: *span,
                    name: *name,
                })?;
                Ok((AbstractedSig::concrete(entry.sig.clone()), Vec::new()))
            }
            ModExpr::Proj { span: _, base, name } => {
                let (base_abs, binds) = self.typecheck_module(addr, env, base)?;
                let record = base_abs
                    .sig
                    .as_structure()
                    .ok_or(TypeError::NotOfStructureType {
                        span: name.span,
                        name: name.value,
                    })?;
                let entry = record
                    .find_module(name.value)
                    .ok_or(TypeError::UnboundModuleName {
                        span: name.span,
                        name: name.value,
                    })?;
                Ok((
                    AbstractedSig {
                        opaques: base_abs.opaques.clone(),
                        sig: entry.sig.clone(),
                    },
                    binds,
                ))
            }
            ModExpr::Binds { span, binds } => {
                let (_, opaques, record, ir_binds) = self.typecheck_binds(addr, env, *span, binds)?;
                Ok((
                    AbstractedSig {
                        opaques,
                        sig: Signature::Structure(record),
                    },
                    ir_binds,
                ))
            }
            ModExpr::Functor {
                span,
                param,
                domain,
                body,
            } => self.typecheck_functor(addr, env, *span, param, domain, body),
            ModExpr::Apply { span, callee, arg } => {
                self.typecheck_apply(addr, env, *span, callee, arg)
            }
            ModExpr::Coerce { span, inner, sig } => {
                let (inner_abs, binds) = self.typecheck_module(addr, env, inner)?;
                let sealed = self.seal(addr, env, *span, inner_abs.sig, sig)?;
                Ok((sealed, binds))
            }
        }
    }

    /// Seals a signature against an ascription, keeping the runtime
    /// names of the implementation.
    fn seal(
        &mut self,
        addr: &[Symbol],
        env: &Env,
        span: Span,
        impl_sig: Signature,
        sig_expr: &SigExpr,
    ) -> Result<AbstractedSig, TypeError> {
        let target = self.typecheck_signature(addr, env, sig_expr)?;
        let target = subtype::rename_abstracted(self.ctx, &target);
        subtype::subtype_abstracted(self.ctx, span, &impl_sig, &target)?;
        let sealed = subtype::copy_closure(&impl_sig, &target.sig);
        Ok(AbstractedSig {
            opaques: target.opaques,
            sig: sealed,
        })
    }

    fn typecheck_functor(
        &mut self,
        addr: &[Symbol],
        env: &Env,
        span: Span,
        param: &ast::Ident,
        domain: &SigExpr,
        body: &ModExpr,
    ) -> Result<(AbstractedSig, Vec<IBind>), TypeError> {
        validate_upper_ident(param.span, param.value)?;
        let domain_abs = self.typecheck_signature(addr, env, domain)?;
        let Signature::Structure(domain_record) = domain_abs.sig else {
            return Err(TypeError::SupportOnlyFirstOrderFunctor { span });
        };

        let mut inner = env.clone();
        let param_space = full_name(addr, param.value);
        inner.add_module(
            param.value,
            ModuleEntry {
                sig: Signature::Structure(domain_record.clone()),
                space: param_space,
            },
        );
        // The codomain is elaborated once against the parameter; the IR
        // it produces is discarded, since each application re-elaborates
        // the body against its actual argument.
        let (codomain_abs, _) = self.typecheck_module(addr, &inner, body)?;

        let functor = FunctorSig {
            opaques: domain_abs.opaques,
            domain: domain_record,
            codomain: (codomain_abs.opaques, codomain_abs.sig),
            closure: Some(FunctorClosure {
                param: *param,
                body: Rc::new(body.clone()),
                env: env.clone(),
            }),
        };
        Ok((
            AbstractedSig::concrete(Signature::Functor(Box::new(functor))),
            Vec::new(),
        ))
    }

    fn typecheck_apply(
        &mut self,
        addr: &[Symbol],
        env: &Env,
        span: Span,
        callee: &ModExpr,
        arg: &ModExpr,
    ) -> Result<(AbstractedSig, Vec<IBind>), TypeError> {
        let (callee_abs, _) = self.typecheck_module(addr, env, callee)?;
        let Signature::Functor(functor) = callee_abs.sig else {
            return Err(TypeError::NotOfFunctorType { span });
        };

        let (arg_abs, _) = self.typecheck_module(addr, env, arg)?;
        let arg_record = match arg_abs.sig {
            Signature::Structure(record) => record,
            Signature::Functor(_) => {
                return Err(TypeError::SupportOnlyFirstOrderFunctor { span });
            }
        };

        let wt = subtype::subtype_concrete_with_abstract(
            self.ctx,
            span,
            &arg_record,
            &functor.opaques,
            &functor.domain,
        )?;

        // Codomain opaques are fresh per instantiation.
        let codomain = subtype::rename_abstracted(
            self.ctx,
            &AbstractedSig {
                opaques: functor.codomain.0.clone(),
                sig: functor.codomain.1.clone(),
            },
        );
        let codomain_sig = wt.apply_sig(&codomain.sig);

        // Re-elaborate the stored body against the actual argument so
        // the emitted IR closes over the argument's global names.
        let (result_sig, binds) = match &functor.closure {
            Some(closure) => {
                let arg_space = self
                    .resolve_module_expr(env, arg)
                    .map(|entry| entry.space)
                    .unwrap_or_else(|| full_name(addr, intern("Arg")));
                let mut body_env = closure.env.clone();
                body_env.add_module(
                    closure.param.value,
                    ModuleEntry {
                        sig: Signature::Structure(arg_record.clone()),
                        space: arg_space,
                    },
                );
                let (body_abs, binds) = self.typecheck_module(addr, &body_env, &closure.body)?;
                (subtype::copy_closure(&body_abs.sig, &codomain_sig), binds)
            }
            None => (codomain_sig, Vec::new()),
        };

        Ok((
            AbstractedSig {
                opaques: codomain.opaques,
                sig: result_sig,
            },
            binds,
        ))
    }

    fn resolve_module_expr(&self, env: &Env, modex: &ModExpr) -> Option<ModuleEntry> {
        match modex {
            ModExpr::Var { name, .. } => env.find_module(*name).cloned(),
            ModExpr::Proj { base, name, .. } => {
                let base_entry = self.resolve_module_expr(env, base)?;
                base_entry
                    .sig
                    .as_structure()?
                    .find_module(name.value)
                    .cloned()
            }
            _ => None,
        }
    }

    // ===== Bindings =====

    pub fn typecheck_binds(
        &mut self,
        addr: &[Symbol],
        env: &Env,
        _span: Span,
        binds: &[Bind],
    ) -> Result<(Env, BTreeSet<OpaqueId>, SigRecord, Vec<IBind>), TypeError> {
        let mut env = env.clone();
        let mut opaques = BTreeSet::new();
        let mut record = SigRecord::new();
        let mut ir_binds = Vec::new();
        for bind in binds {
            self.typecheck_binding(addr, &mut env, &mut opaques, &mut record, &mut ir_binds, bind)?;
        }
        Ok((env, opaques, record, ir_binds))
    }

    fn typecheck_binding(
        &mut self,
        addr: &[Symbol],
        env: &mut Env,
        opaques: &mut BTreeSet<OpaqueId>,
        record: &mut SigRecord,
        ir_binds: &mut Vec<IBind>,
        bind: &Bind,
    ) -> Result<(), TypeError> {
        match &bind.kind {
            BindKind::Val(val) => self.typecheck_val(addr, env, record, ir_binds, bind.span, val),
            BindKind::Type(defs) => {
                let entries = self.elaborate_type_defs(addr, env, bind.span, defs)?;
                for (ns, name, entry) in entries {
                    insert_entry(record, bind.span, ns, name, entry)?;
                }
                Ok(())
            }
            BindKind::Module { name, sig, body } => {
                validate_upper_ident(name.span, name.value)?;
                let mut child_addr = addr.to_vec();
                child_addr.push(name.value);
                let (body_abs, body_binds) = self.typecheck_module(&child_addr, env, body)?;
                let final_abs = match sig {
                    Some(sig_expr) => {
                        self.seal(&child_addr, env, bind.span, body_abs.sig, sig_expr)?
                    }
                    None => body_abs,
                };
                let space = space_of(&child_addr);
                let entry = ModuleEntry {
                    sig: final_abs.sig,
                    space,
                };
                env.add_module(name.value, entry.clone());
                insert_entry(
                    record,
                    bind.span,
                    Namespace::Module,
                    name.value,
                    SigEntry::Module(entry),
                )?;
                opaques.extend(final_abs.opaques);
                ir_binds.push(IBind::Module(space, body_binds));
                Ok(())
            }
            BindKind::Sig { name, sig } => {
                validate_upper_ident(name.span, name.value)?;
                let abs = self.typecheck_signature(addr, env, sig)?;
                // A signature binding must not capture the existentials
                // introduced by earlier sealed bindings of this very
                // structure.
                let mut mentioned = BTreeSet::new();
                subtype::collect_opaques_sig(&abs.sig, &mut mentioned);
                if let Some(escaping) = mentioned.intersection(opaques).next() {
                    return Err(TypeError::OpaqueIdExtrudesScopeViaSignature {
                        span: bind.span,
                        id: *escaping,
                    });
                }
                env.add_sig(name.value, abs.clone());
                insert_entry(
                    record,
                    bind.span,
                    Namespace::Sig,
                    name.value,
                    SigEntry::Sig(abs),
                )
            }
            BindKind::Include { body } => {
                let (abs, binds) = self.typecheck_module(addr, env, body)?;
                let Signature::Structure(included) = abs.sig else {
                    return Err(TypeError::NotOfStructureType {
                        span: bind.span,
                        name: intern("include"),
                    });
                };
                env.open_structure(&included);
                for (ns, name, entry) in included.iter() {
                    insert_entry(record, bind.span, ns, name, entry.clone())?;
                }
                opaques.extend(abs.opaques);
                ir_binds.extend(binds);
                Ok(())
            }
        }
    }

    fn typecheck_val(
        &mut self,
        addr: &[Symbol],
        env: &mut Env,
        record: &mut SigRecord,
        ir_binds: &mut Vec<IBind>,
        span: Span,
        val: &ValBinding,
    ) -> Result<(), TypeError> {
        let space = space_of(addr);
        match val {
            ValBinding::External {
                name,
                scheme,
                arity,
            } => {
                validate_value_ident(name.span, name.value)?;
                let pty = convert::decode_scheme(self.ctx, env, scheme)?;
                let gname = self.ctx.fresh_global_name(space, name.value, *arity as u32);
                let entry = ValEntry {
                    pty,
                    name: ValName::Global(gname),
                };
                env.add_val(name.value, entry.clone());
                insert_entry(record, span, Namespace::Val, name.value, SigEntry::Val(entry))
            }
            ValBinding::NonRec {
                name,
                params,
                ret,
                body,
            } => {
                validate_value_ident(name.span, name.value)?;
                log::debug!("elaborating val {}", interner::name_of(name.value));
                let pre = Pre::default();
                let deeper = pre.deeper();
                let is_plain_value = params.ordered.is_empty()
                    && params.labeled.is_empty()
                    && params.optional.is_empty()
                    && matches!(body, Body::Pure(_));
                let mut checker = Checker::new(self.ctx, self.prims);
                let (ir, ty) = if is_plain_value {
                    let Body::Pure(expr) = body else { unreachable!() };
                    let (ir, ty) = checker.infer(&deeper, env, expr)?;
                    if let Some(annot) = ret {
                        let d = DecodeCtx {
                            env,
                            type_params: &deeper.type_params,
                            row_params: &deeper.row_params,
                        };
                        let expected = convert::decode_type(checker.ctx, &d, annot)?;
                        unify::unify(checker.ctx, annot.span(), &ty, &expected)?;
                    }
                    (ir, ty)
                } else {
                    checker.elaborate_function(&deeper, env, params, ret.as_ref(), body, None)?
                };
                let pty = poly::generalize(self.ctx, name.span, pre.level, &ty)?;
                let gname =
                    self.ctx
                        .fresh_global_name(space, name.value, params.ordered.len() as u32);
                let entry = ValEntry {
                    pty,
                    name: ValName::Global(gname),
                };
                env.add_val(name.value, entry.clone());
                insert_entry(record, span, Namespace::Val, name.value, SigEntry::Val(entry))?;
                ir_binds.push(IBind::Val(gname, ir));
                Ok(())
            }
            ValBinding::Rec(recs) => {
                let pre = Pre::default();
                let deeper = pre.deeper();
                let mut inner = env.clone();
                let mut gnames = Vec::with_capacity(recs.len());
                let mut placeholders = Vec::with_capacity(recs.len());
                for rec in recs {
                    validate_value_ident(rec.name.span, rec.name.value)?;
                    let gname = self.ctx.fresh_global_name(
                        space,
                        rec.name.value,
                        rec.params.ordered.len() as u32,
                    );
                    let placeholder = self.ctx.fresh_type_var(deeper.level);
                    inner.add_val(
                        rec.name.value,
                        ValEntry {
                            pty: poly::lift(&placeholder),
                            name: ValName::Global(gname),
                        },
                    );
                    gnames.push(gname);
                    placeholders.push(placeholder);
                }

                let mut irs = Vec::with_capacity(recs.len());
                for (rec, placeholder) in recs.iter().zip(&placeholders) {
                    let mut checker = Checker::new(self.ctx, self.prims);
                    let (ir, ty) = checker.elaborate_function(
                        &deeper,
                        &inner,
                        &rec.params,
                        rec.ret.as_ref(),
                        &rec.body,
                        None,
                    )?;
                    unify::unify(self.ctx, rec.span, &ty, placeholder)?;
                    irs.push(ir);
                }

                for ((rec, gname), placeholder) in
                    recs.iter().zip(&gnames).zip(&placeholders)
                {
                    let pty = poly::generalize(self.ctx, rec.span, pre.level, placeholder)?;
                    let entry = ValEntry {
                        pty,
                        name: ValName::Global(*gname),
                    };
                    env.add_val(rec.name.value, entry.clone());
                    insert_entry(
                        record,
                        rec.span,
                        Namespace::Val,
                        rec.name.value,
                        SigEntry::Val(entry),
                    )?;
                }
                for (gname, ir) in gnames.into_iter().zip(irs) {
                    ir_binds.push(IBind::Val(gname, ir));
                }
                Ok(())
            }
        }
    }

    /// Elaborates one `type ... and ...` group: pre-registers all the
    /// IDs so the definitions may reference each other, decodes bodies,
    /// and rejects synonym cycles.
    fn elaborate_type_defs(
        &mut self,
        addr: &[Symbol],
        env: &mut Env,
        span: Span,
        defs: &[TypeDefBinding],
    ) -> Result<Vec<(Namespace, Symbol, SigEntry)>, TypeError> {
        let mut ids = Vec::with_capacity(defs.len());
        for def in defs {
            validate_value_ident(def.name.span, def.name.value)?;
            let full = full_name(addr, def.name.value);
            let id = match &def.def {
                TypeDefBody::Synonym(_) => TypeId::Synonym(self.ctx.fresh_synonym_id(full)),
                TypeDefBody::Variant(_) => TypeId::Variant(self.ctx.fresh_variant_id(full)),
            };
            env.add_type(
                def.name.value,
                TypeEntry {
                    id,
                    arity: def.params.len(),
                },
            );
            ids.push(id);
        }

        let empty_rows = std::collections::HashMap::new();
        for (def, id) in defs.iter().zip(&ids) {
            let (type_params, bids) = convert::make_type_param_map(self.ctx, &def.params)?;
            match (&def.def, id) {
                (TypeDefBody::Synonym(te), TypeId::Synonym(sid)) => {
                    let d = DecodeCtx {
                        env,
                        type_params: &type_params,
                        row_params: &empty_rows,
                    };
                    let mut deps = Vec::new();
                    let body = convert::decode_poly_body(self.ctx, &d, te, &mut deps)?;
                    self.ctx.register_synonym(
                        *sid,
                        SynonymDef {
                            params: bids,
                            body,
                        },
                    );
                    for dep in deps {
                        self.ctx.synonym_graph.add_edge(*sid, dep);
                    }
                }
                (TypeDefBody::Variant(ctors), TypeId::Variant(vid)) => {
                    let mut ctor_map = IndexMap::new();
                    for (ctor_name, arg_tes) in ctors {
                        validate_upper_ident(ctor_name.span, ctor_name.value)?;
                        let cid = self.ctx.fresh_ctor_id(full_name(addr, ctor_name.value));
                        let mut arg_types = Vec::with_capacity(arg_tes.len());
                        for te in arg_tes {
                            let d = DecodeCtx {
                                env,
                                type_params: &type_params,
                                row_params: &empty_rows,
                            };
                            let mut deps = Vec::new();
                            arg_types.push(convert::decode_poly_body(
                                self.ctx, &d, te, &mut deps,
                            )?);
                        }
                        if ctor_map
                            .insert(
                                ctor_name.value,
                                CtorDef {
                                    id: cid,
                                    params: arg_types,
                                },
                            )
                            .is_some()
                        {
                            return Err(TypeError::ConflictInSignature {
                                span: ctor_name.span,
                                name: ctor_name.value,
                            });
                        }
                    }
                    self.ctx.register_variant(
                        *vid,
                        VariantDef {
                            params: bids,
                            ctors: ctor_map,
                        },
                    );
                }
                _ => unreachable!("definition kind fixed in the first pass"),
            }
        }

        if let Some(cycle) = self.ctx.synonym_graph.find_cycle() {
            return Err(TypeError::CyclicSynonymTypeDefinition { span, cycle });
        }

        let mut entries = Vec::new();
        for (def, id) in defs.iter().zip(&ids) {
            entries.push((
                Namespace::Type,
                def.name.value,
                SigEntry::Type(TypeEntry {
                    id: *id,
                    arity: def.params.len(),
                }),
            ));
            if let TypeId::Variant(vid) = id {
                let vdef = self.ctx.variant_def(*vid).clone();
                for (ctor_name, ctor_def) in &vdef.ctors {
                    let entry = CtorEntry {
                        variant: *vid,
                        ctor: ctor_def.id,
                        params: vdef.params.clone(),
                        arg_types: ctor_def.params.clone(),
                    };
                    env.add_ctor(*ctor_name, entry.clone());
                    entries.push((Namespace::Ctor, *ctor_name, SigEntry::Ctor(entry)));
                }
            }
        }
        Ok(entries)
    }

    // ===== Signature expressions =====

    pub fn typecheck_signature(
        &mut self,
        addr: &[Symbol],
        env: &Env,
        sig: &SigExpr,
    ) -> Result<AbstractedSig, TypeError> {
        match sig {
            SigExpr::Var { span, name } => {
                let abs = env.find_sig(*name).ok_or(TypeError::UnboundSignatureName {
                    span: *span,
                    name: *name,
                })?;
                // Every use of a named signature works on a fresh copy.
                let abs = abs.clone();
                Ok(subtype::rename_abstracted(self.ctx, &abs))
            }
            SigExpr::Proj { span: _, path, name } => {
                let module = convert::resolve_path(env, path)?.ok_or(
                    TypeError::UnboundSignatureName {
                        span: name.span,
                        name: name.value,
                    },
                )?;
                let record = module
                    .sig
                    .as_structure()
                    .ok_or(TypeError::NotOfStructureType {
                        span: name.span,
                        name: name.value,
                    })?;
                let abs = record
                    .find_sig(name.value)
                    .ok_or(TypeError::UnboundSignatureName {
                        span: name.span,
                        name: name.value,
                    })?
                    .clone();
                Ok(subtype::rename_abstracted(self.ctx, &abs))
            }
            SigExpr::Decls { span, decls } => self.typecheck_sig_decls(addr, env, *span, decls),
            SigExpr::Functor {
                span,
                param,
                domain,
                codomain,
            } => {
                validate_upper_ident(param.span, param.value)?;
                let domain_abs = self.typecheck_signature(addr, env, domain)?;
                let Signature::Structure(domain_record) = domain_abs.sig else {
                    return Err(TypeError::SupportOnlyFirstOrderFunctor { span: *span });
                };
                let mut inner = env.clone();
                inner.add_module(
                    param.value,
                    ModuleEntry {
                        sig: Signature::Structure(domain_record.clone()),
                        space: full_name(addr, param.value),
                    },
                );
                let codomain_abs = self.typecheck_signature(addr, &inner, codomain)?;
                Ok(AbstractedSig::concrete(Signature::Functor(Box::new(
                    FunctorSig {
                        opaques: domain_abs.opaques,
                        domain: domain_record,
                        codomain: (codomain_abs.opaques, codomain_abs.sig),
                        closure: None,
                    },
                ))))
            }
            SigExpr::WithType {
                span,
                base,
                name,
                params,
                body,
            } => self.typecheck_with_type(addr, env, *span, base, name, params, body),
        }
    }

    fn typecheck_sig_decls(
        &mut self,
        addr: &[Symbol],
        env: &Env,
        span: Span,
        decls: &[SigDecl],
    ) -> Result<AbstractedSig, TypeError> {
        let mut env = env.clone();
        let mut opaques = BTreeSet::new();
        let mut record = SigRecord::new();
        for decl in decls {
            match decl {
                SigDecl::Val { name, scheme } => {
                    validate_value_ident(name.span, name.value)?;
                    let pty = convert::decode_scheme(self.ctx, &env, scheme)?;
                    let arity = poly_arity(&pty);
                    // Placeholder runtime name; sealing copies the
                    // implementation's over it.
                    let gname =
                        self.ctx
                            .fresh_global_name(space_of(addr), name.value, arity);
                    insert_entry(
                        &mut record,
                        name.span,
                        Namespace::Val,
                        name.value,
                        SigEntry::Val(ValEntry {
                            pty,
                            name: ValName::Global(gname),
                        }),
                    )?;
                }
                SigDecl::TypeOpaque { name, kind } => {
                    validate_value_ident(name.span, name.value)?;
                    let empty_types = std::collections::HashMap::new();
                    let empty_rows = std::collections::HashMap::new();
                    let d = DecodeCtx {
                        env: &env,
                        type_params: &empty_types,
                        row_params: &empty_rows,
                    };
                    let decoded = convert::decode_kind(self.ctx, &d, kind)?;
                    let arity = decoded.arity();
                    let oid = self
                        .ctx
                        .fresh_opaque_id(full_name(addr, name.value), decoded);
                    opaques.insert(oid);
                    let entry = TypeEntry {
                        id: TypeId::Opaque(oid),
                        arity,
                    };
                    env.add_type(name.value, entry);
                    insert_entry(
                        &mut record,
                        name.span,
                        Namespace::Type,
                        name.value,
                        SigEntry::Type(entry),
                    )?;
                }
                SigDecl::Type(defs) => {
                    let entries = self.elaborate_type_defs(addr, &mut env, span, defs)?;
                    for (ns, name, entry) in entries {
                        insert_entry(&mut record, span, ns, name, entry)?;
                    }
                }
                SigDecl::Module { name, sig } => {
                    validate_upper_ident(name.span, name.value)?;
                    let inner = self.typecheck_signature(addr, &env, sig)?;
                    opaques.extend(inner.opaques.iter().copied());
                    let entry = ModuleEntry {
                        sig: inner.sig,
                        space: full_name(addr, name.value),
                    };
                    env.add_module(name.value, entry.clone());
                    insert_entry(
                        &mut record,
                        name.span,
                        Namespace::Module,
                        name.value,
                        SigEntry::Module(entry),
                    )?;
                }
                SigDecl::Sig { name, sig } => {
                    validate_upper_ident(name.span, name.value)?;
                    let inner = self.typecheck_signature(addr, &env, sig)?;
                    env.add_sig(name.value, inner.clone());
                    insert_entry(
                        &mut record,
                        name.span,
                        Namespace::Sig,
                        name.value,
                        SigEntry::Sig(inner),
                    )?;
                }
                SigDecl::Include(inner_sig) => {
                    let inner = self.typecheck_signature(addr, &env, inner_sig)?;
                    let Signature::Structure(included) = inner.sig else {
                        return Err(TypeError::NotAStructureSignature { span });
                    };
                    env.open_structure(&included);
                    for (ns, name, entry) in included.iter() {
                        insert_entry(&mut record, span, ns, name, entry.clone())?;
                    }
                    opaques.extend(inner.opaques);
                }
            }
        }
        Ok(AbstractedSig {
            opaques,
            sig: Signature::Structure(record),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn typecheck_with_type(
        &mut self,
        addr: &[Symbol],
        env: &Env,
        span: Span,
        base: &SigExpr,
        name: &ast::Ident,
        params: &[ast::Ident],
        body: &ast::TypeExpr,
    ) -> Result<AbstractedSig, TypeError> {
        let base_abs = self.typecheck_signature(addr, env, base)?;
        let Signature::Structure(record) = &base_abs.sig else {
            return Err(TypeError::NotAStructureSignature { span });
        };
        let entry = record
            .find_type(name.value)
            .ok_or(TypeError::UndefinedTypeName {
                span: name.span,
                name: name.value,
            })?;
        let TypeId::Opaque(oid) = entry.id else {
            return Err(TypeError::CannotRestrictTransparentType {
                span,
                name: name.value,
            });
        };
        if !base_abs.opaques.contains(&oid) {
            return Err(TypeError::CannotRestrictTransparentType {
                span,
                name: name.value,
            });
        }
        if entry.arity != params.len() {
            return Err(TypeError::InvalidNumberOfTypeArguments {
                span,
                name: name.value,
                expected: entry.arity,
                found: params.len(),
            });
        }
        let kind = self.ctx.opaque_kind(oid).clone();
        if kind
            .params
            .iter()
            .any(|k| matches!(k, BaseKindF::Record(_)))
        {
            // Refinement parameters are universally kinded.
            return Err(TypeError::KindContradiction { span });
        }

        let (type_params, bids) = convert::make_type_param_map(self.ctx, params)?;
        let empty_rows = std::collections::HashMap::new();
        let d = DecodeCtx {
            env,
            type_params: &type_params,
            row_params: &empty_rows,
        };
        let mut deps = Vec::new();
        let body_pty = convert::decode_poly_body(self.ctx, &d, body, &mut deps)?;
        if matches!(kind.ret, BaseKindF::Record(_)) && !matches!(body_pty, TypeF::Record(_)) {
            return Err(TypeError::KindContradiction { span });
        }
        let mut mentioned = BTreeSet::new();
        subtype::collect_opaques_poly(&body_pty, &mut mentioned);
        if let Some(escaping) = mentioned.intersection(&base_abs.opaques).next() {
            return Err(TypeError::OpaqueIdExtrudesScopeViaType {
                span,
                id: *escaping,
            });
        }

        let sid = self.ctx.fresh_synonym_id(full_name(addr, name.value));
        self.ctx.register_synonym(
            sid,
            SynonymDef {
                params: bids,
                body: body_pty,
            },
        );
        for dep in deps {
            self.ctx.synonym_graph.add_edge(sid, dep);
        }

        let mut wt = WitnessMap::new();
        wt.opaques.insert(oid, TypeId::Synonym(sid));
        let refined = wt.apply_sig(&base_abs.sig);
        let mut opaques = base_abs.opaques.clone();
        opaques.remove(&oid);
        Ok(AbstractedSig {
            opaques,
            sig: refined,
        })
    }
}
