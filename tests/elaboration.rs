//! End-to-end elaboration scenarios. The parser sits above this crate,
//! so every test builds its AST directly through small helpers.

use sestc::ast::*;
use sestc::interner::intern;
use sestc::primitives::{self, Primitives};
use sestc::typechecker::context::Context;
use sestc::typechecker::env::{Env, Namespace};
use sestc::typechecker::error::TypeError;
use sestc::typechecker::types::{
    BaseKindF, PolyType, PolyTypeVar, RowF, RowVar, Type, TypeF, TypeId, TypeVar,
};
use sestc::typechecker::{elaborate_root, infer_expr, Elaboration};

// ===== AST builders =====

fn sp() -> Span {
    Span::synthetic()
}

fn ident(name: &str) -> Ident {
    Ident::new(intern(name), sp())
}

fn var(name: &str) -> Expr {
    Expr::Var {
        span: sp(),
        path: vec![],
        name: intern(name),
    }
}

fn int(n: i64) -> Expr {
    Expr::Literal {
        span: sp(),
        lit: Literal::Int(n),
    }
}

fn boolean(b: bool) -> Expr {
    Expr::Literal {
        span: sp(),
        lit: Literal::Bool(b),
    }
}

fn param(name: &str) -> Param {
    Param {
        name: ident(name),
        annot: None,
    }
}

fn param_annot(name: &str, annot: TypeExpr) -> Param {
    Param {
        name: ident(name),
        annot: Some(annot),
    }
}

fn ordered_params(params: Vec<Param>) -> Params {
    Params {
        ordered: params,
        labeled: vec![],
        optional: vec![],
    }
}

fn lambda(params: Vec<Param>, body: Expr) -> Expr {
    Expr::Lambda {
        span: sp(),
        params: ordered_params(params),
        body: Box::new(Body::Pure(body)),
    }
}

fn app(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Apply {
        span: sp(),
        callee: Box::new(callee),
        args: Args {
            ordered: args,
            labeled: vec![],
            optional: vec![],
        },
    }
}

fn te_name(name: &str, args: Vec<TypeExpr>) -> TypeExpr {
    TypeExpr::Name {
        span: sp(),
        path: vec![],
        name: ident(name),
        args,
    }
}

fn te_proj(path: &str, name: &str) -> TypeExpr {
    TypeExpr::Name {
        span: sp(),
        path: vec![ident(path)],
        name: ident(name),
        args: vec![],
    }
}

fn val_fn(name: &str, params: Vec<Param>, ret: Option<TypeExpr>, body: Expr) -> Bind {
    Bind {
        span: sp(),
        kind: BindKind::Val(ValBinding::NonRec {
            name: ident(name),
            params: ordered_params(params),
            ret,
            body: Body::Pure(body),
        }),
    }
}

fn val_value(name: &str, body: Expr) -> Bind {
    val_fn(name, vec![], None, body)
}

fn opaque_decl(name: &str) -> SigDecl {
    SigDecl::TypeOpaque {
        name: ident(name),
        kind: KindExpr {
            span: sp(),
            params: vec![],
            ret: BaseKindExpr::Name {
                span: sp(),
                name: intern("o"),
            },
        },
    }
}

fn sig_decls(decls: Vec<SigDecl>) -> SigExpr {
    SigExpr::Decls { span: sp(), decls }
}

fn val_decl(name: &str, body: TypeExpr) -> SigDecl {
    SigDecl::Val {
        name: ident(name),
        scheme: TypeSchemeExpr {
            span: sp(),
            type_params: vec![],
            row_params: vec![],
            body,
        },
    }
}

fn struct_of(binds: Vec<Bind>) -> ModExpr {
    ModExpr::Binds { span: sp(), binds }
}

fn elaborate(binds: Vec<Bind>) -> Result<(Context, Primitives, Elaboration), TypeError> {
    let mut ctx = Context::new();
    let (env, prims) = primitives::install(&mut ctx);
    let unit = SourceUnit {
        span: sp(),
        name: ident("Main"),
        body: struct_of(binds),
    };
    let out = elaborate_root(&mut ctx, &prims, &env, &unit)?;
    Ok((ctx, prims, out))
}

fn setup_expr() -> (Context, Primitives, Env) {
    let mut ctx = Context::new();
    let (env, prims) = primitives::install(&mut ctx);
    (ctx, prims, env)
}

// ===== Scenario 1: let-polymorphic identity =====

#[test]
fn identity_generalizes_and_instantiates() {
    let binds = vec![
        val_fn("id", vec![param("x")], None, var("x")),
        val_value("a", app(var("id"), vec![int(3)])),
        val_value("b", app(var("id"), vec![boolean(true)])),
    ];
    let (_, _, out) = elaborate(binds).unwrap();

    let id = out.record.find_val(intern("id")).unwrap();
    match &id.pty {
        TypeF::Fun(domain, codomain) => {
            assert_eq!(&domain.ordered[0], codomain.as_ref());
            assert!(matches!(
                codomain.as_ref(),
                TypeF::Var(PolyTypeVar::Bound(_))
            ));
        }
        other => panic!("expected polymorphic function type, got {other}"),
    }
    assert_eq!(
        out.record.find_val(intern("a")).unwrap().pty,
        TypeF::Base(sestc::typechecker::types::BaseType::Int)
    );
    assert_eq!(
        out.record.find_val(intern("b")).unwrap().pty,
        TypeF::Base(sestc::typechecker::types::BaseType::Bool)
    );
}

// ===== Scenario 2: recursive map =====

#[test]
fn recursive_map_has_principal_type() {
    // val rec map(f, xs) = case xs of [] -> [] | x :: t -> f(x) :: map(f, t) end
    let body = Expr::Case {
        span: sp(),
        scrutinee: Box::new(var("xs")),
        arms: vec![
            CaseArm {
                span: sp(),
                pattern: Pattern::ListNil { span: sp() },
                body: Expr::ListNil { span: sp() },
            },
            CaseArm {
                span: sp(),
                pattern: Pattern::ListCons {
                    span: sp(),
                    head: Box::new(Pattern::Var {
                        span: sp(),
                        name: intern("x"),
                    }),
                    tail: Box::new(Pattern::Var {
                        span: sp(),
                        name: intern("t"),
                    }),
                },
                body: Expr::ListCons {
                    span: sp(),
                    head: Box::new(app(var("f"), vec![var("x")])),
                    tail: Box::new(app(var("map"), vec![var("f"), var("t")])),
                },
            },
        ],
    };
    let binds = vec![Bind {
        span: sp(),
        kind: BindKind::Val(ValBinding::Rec(vec![RecBinding {
            span: sp(),
            name: ident("map"),
            params: ordered_params(vec![param("f"), param("xs")]),
            ret: None,
            body: Body::Pure(body),
        }])),
    }];
    let (_, prims, out) = elaborate(binds).unwrap();

    let map_pty = &out.record.find_val(intern("map")).unwrap().pty;
    let TypeF::Fun(domain, codomain) = map_pty else {
        panic!("expected function type, got {map_pty}");
    };
    assert_eq!(domain.ordered.len(), 2);

    // First parameter: 'a -> 'b
    let TypeF::Fun(f_domain, f_codomain) = &domain.ordered[0] else {
        panic!("expected function parameter, got {}", domain.ordered[0]);
    };
    let a = &f_domain.ordered[0];
    let b = f_codomain.as_ref();
    assert!(matches!(a, TypeF::Var(PolyTypeVar::Bound(_))));
    assert!(matches!(b, TypeF::Var(PolyTypeVar::Bound(_))));
    assert_ne!(a, b);

    // Second parameter: list<'a>; result: list<'b>.
    assert_eq!(
        &domain.ordered[1],
        &TypeF::Data(TypeId::Variant(prims.list), vec![a.clone()])
    );
    assert_eq!(
        codomain.as_ref(),
        &TypeF::Data(TypeId::Variant(prims.list), vec![b.clone()])
    );
}

// ===== Scenario 3: synonym cycle =====

#[test]
fn mutually_recursive_synonyms_are_rejected() {
    let binds = vec![Bind {
        span: sp(),
        kind: BindKind::Type(vec![
            TypeDefBinding {
                span: sp(),
                name: ident("a"),
                params: vec![],
                def: TypeDefBody::Synonym(te_name("b", vec![])),
            },
            TypeDefBinding {
                span: sp(),
                name: ident("b"),
                params: vec![],
                def: TypeDefBody::Synonym(te_name("a", vec![])),
            },
        ]),
    }];
    let err = elaborate(binds).unwrap_err();
    match err {
        TypeError::CyclicSynonymTypeDefinition { cycle, .. } => {
            assert_eq!(cycle.len(), 2);
        }
        other => panic!("expected synonym cycle, got {other}"),
    }
}

// ===== Scenario 4: row-polymorphic record access =====

#[test]
fn record_access_constrains_by_kind_only() {
    let (mut ctx, prims, env) = setup_expr();
    // fun r -> r.name
    let access = lambda(
        vec![param("r")],
        Expr::RecordAccess {
            span: sp(),
            expr: Box::new(var("r")),
            label: ident("name"),
        },
    );
    let ty = infer_expr(&mut ctx, &prims, &env, &access).unwrap();
    let TypeF::Fun(domain, codomain) = &ty else {
        panic!("expected function type, got {ty}");
    };
    // The scrutinee is still a variable, constrained only by a
    // record kind with the accessed label.
    let TypeF::Var(TypeVar::Free(fid)) = &domain.ordered[0] else {
        panic!("expected free scrutinee, got {}", domain.ordered[0]);
    };
    match ctx.tv_kind(*fid) {
        BaseKindF::Record(fields) => {
            assert_eq!(fields.len(), 1);
            assert_eq!(fields.get(&intern("name")), Some(codomain.as_ref()));
        }
        BaseKindF::Universal => panic!("expected record kind on scrutinee"),
    }
}

#[test]
fn record_access_unifies_with_wider_record() {
    let (mut ctx, prims, env) = setup_expr();
    // (fun r -> r.name)({name = 3, age = 4})
    let access = lambda(
        vec![param("r")],
        Expr::RecordAccess {
            span: sp(),
            expr: Box::new(var("r")),
            label: ident("name"),
        },
    );
    let record = Expr::Record {
        span: sp(),
        fields: vec![(ident("name"), int(3)), (ident("age"), int(4))],
    };
    let ty = infer_expr(&mut ctx, &prims, &env, &app(access, vec![record])).unwrap();
    assert_eq!(ty, Type::int());
}

// ===== Scenario 5: opaque IDs are fresh per functor entry =====

#[test]
fn functor_entries_freshen_opaque_ids() {
    // signature S = sig type t end
    // module F = fun(X : S) -> fun(Y : S) ->
    //   struct val f(x : X.t) : Y.t = x end
    let sig_s = sig_decls(vec![opaque_decl("t")]);
    let inner = ModExpr::Functor {
        span: sp(),
        param: ident("Y"),
        domain: sig_s.clone(),
        body: Box::new(struct_of(vec![val_fn(
            "f",
            vec![param_annot("x", te_proj("X", "t"))],
            Some(te_proj("Y", "t")),
            var("x"),
        )])),
    };
    let outer = ModExpr::Functor {
        span: sp(),
        param: ident("X"),
        domain: sig_s,
        body: Box::new(inner),
    };
    let binds = vec![Bind {
        span: sp(),
        kind: BindKind::Module {
            name: ident("F"),
            sig: None,
            body: outer,
        },
    }];
    let err = elaborate(binds).unwrap_err();
    assert!(
        matches!(err, TypeError::ContradictionError { .. }),
        "two functor entries must mint distinct opaque IDs, got {err}"
    );
}

// ===== Scenario 6: receive and send agree on the process type =====

#[test]
fn receive_fixes_the_process_receive_type() {
    // val worker(parent : pid<int>) = receive | n -> send(parent, n) end
    let receive = Comp::Receive {
        span: sp(),
        arms: vec![CompArm {
            span: sp(),
            pattern: Pattern::Var {
                span: sp(),
                name: intern("n"),
            },
            body: Comp::Apply {
                span: sp(),
                callee: Box::new(var("send")),
                args: Args {
                    ordered: vec![var("parent"), var("n")],
                    labeled: vec![],
                    optional: vec![],
                },
            },
        }],
    };
    let binds = vec![Bind {
        span: sp(),
        kind: BindKind::Val(ValBinding::NonRec {
            name: ident("worker"),
            params: ordered_params(vec![param_annot(
                "parent",
                te_name("pid", vec![te_name("int", vec![])]),
            )]),
            ret: None,
            body: Body::Effectful(receive),
        }),
    }];
    let (_, _, out) = elaborate(binds).unwrap();

    let worker = &out.record.find_val(intern("worker")).unwrap().pty;
    let TypeF::Eff(domain, recv, codomain) = worker else {
        panic!("expected effectful function, got {worker}");
    };
    let int_pty: PolyType = TypeF::Base(sestc::typechecker::types::BaseType::Int);
    assert_eq!(domain.ordered[0], TypeF::Pid(Box::new(int_pty.clone())));
    // The arm pattern's type flowed into the receive type...
    assert_eq!(recv.0, int_pty);
    // ...and send returns unit.
    assert_eq!(
        codomain.as_ref(),
        &TypeF::Base(sestc::typechecker::types::BaseType::Unit)
    );
}

#[test]
fn spawn_returns_pid_of_spawned_receive_type() {
    // val boot(parent : pid<int>) =
    //   spawn(fun() -> receive | n -> send(parent, n) end end)
    let child = Expr::Lambda {
        span: sp(),
        params: ordered_params(vec![]),
        body: Box::new(Body::Effectful(Comp::Receive {
            span: sp(),
            arms: vec![CompArm {
                span: sp(),
                pattern: Pattern::Var {
                    span: sp(),
                    name: intern("n"),
                },
                body: Comp::Apply {
                    span: sp(),
                    callee: Box::new(var("send")),
                    args: Args {
                        ordered: vec![var("parent"), var("n")],
                        labeled: vec![],
                        optional: vec![],
                    },
                },
            }],
        })),
    };
    let binds = vec![Bind {
        span: sp(),
        kind: BindKind::Val(ValBinding::NonRec {
            name: ident("boot"),
            params: ordered_params(vec![param_annot(
                "parent",
                te_name("pid", vec![te_name("int", vec![])]),
            )]),
            ret: None,
            body: Body::Effectful(Comp::Apply {
                span: sp(),
                callee: Box::new(var("spawn")),
                args: Args {
                    ordered: vec![child],
                    labeled: vec![],
                    optional: vec![],
                },
            }),
        }),
    }];
    let (_, _, out) = elaborate(binds).unwrap();

    let boot = &out.record.find_val(intern("boot")).unwrap().pty;
    let TypeF::Eff(_, own_eff, codomain) = boot else {
        panic!("expected effectful function, got {boot}");
    };
    // The spawned process receives int, so the pid parameter is int.
    let int_pty: PolyType = TypeF::Base(sestc::typechecker::types::BaseType::Int);
    assert_eq!(codomain.as_ref(), &TypeF::Pid(Box::new(int_pty)));
    // boot's own receive type stays polymorphic.
    assert!(matches!(
        own_eff.0,
        TypeF::Var(PolyTypeVar::Bound(_))
    ));
}

// ===== Module system =====

#[test]
fn sealing_hides_the_representation() {
    // module M = (struct type t = int  val x : t = 3 end
    //             : sig type t  val x : t end)
    let impl_struct = struct_of(vec![
        Bind {
            span: sp(),
            kind: BindKind::Type(vec![TypeDefBinding {
                span: sp(),
                name: ident("t"),
                params: vec![],
                def: TypeDefBody::Synonym(te_name("int", vec![])),
            }]),
        },
        val_fn("x", vec![], Some(te_name("t", vec![])), int(3)),
    ]);
    let seal = sig_decls(vec![opaque_decl("t"), val_decl("x", te_name("t", vec![]))]);
    let binds = vec![Bind {
        span: sp(),
        kind: BindKind::Module {
            name: ident("M"),
            sig: Some(seal),
            body: impl_struct,
        },
    }];
    let (_, _, out) = elaborate(binds).unwrap();

    assert_eq!(out.opaques.len(), 1);
    let module = out.record.find_module(intern("M")).unwrap();
    let record = module.sig.as_structure().unwrap();
    let t_entry = record.find_type(intern("t")).unwrap();
    let TypeId::Opaque(oid) = t_entry.id else {
        panic!("sealed type must be opaque");
    };
    assert!(out.opaques.contains(&oid));
    // The sealed value's type is the opaque, not int.
    let x = record.find_val(intern("x")).unwrap();
    assert_eq!(x.pty, TypeF::Data(TypeId::Opaque(oid), vec![]));
}

#[test]
fn sealing_missing_value_fails() {
    let impl_struct = struct_of(vec![val_value("x", int(3))]);
    let seal = sig_decls(vec![
        val_decl("x", te_name("int", vec![])),
        val_decl("y", te_name("int", vec![])),
    ]);
    let binds = vec![Bind {
        span: sp(),
        kind: BindKind::Module {
            name: ident("M"),
            sig: Some(seal),
            body: impl_struct,
        },
    }];
    let err = elaborate(binds).unwrap_err();
    assert!(matches!(
        err,
        TypeError::MissingRequiredValName { name, .. } if name == intern("y")
    ));
}

#[test]
fn with_type_reveals_the_opaque() {
    // signature S = sig type t  val x : t end
    // module M = (struct type t = int val x : t = 3 end : S with type t = int)
    // val y = M.x + nothing — just check M.x : int
    let sig_s = sig_decls(vec![opaque_decl("t"), val_decl("x", te_name("t", vec![]))]);
    let refined = SigExpr::WithType {
        span: sp(),
        base: Box::new(sig_s),
        name: ident("t"),
        params: vec![],
        body: te_name("int", vec![]),
    };
    let impl_struct = struct_of(vec![
        Bind {
            span: sp(),
            kind: BindKind::Type(vec![TypeDefBinding {
                span: sp(),
                name: ident("t"),
                params: vec![],
                def: TypeDefBody::Synonym(te_name("int", vec![])),
            }]),
        },
        val_fn("x", vec![], Some(te_name("t", vec![])), int(3)),
    ]);
    let binds = vec![
        Bind {
            span: sp(),
            kind: BindKind::Module {
                name: ident("M"),
                sig: Some(refined),
                body: impl_struct,
            },
        },
        // Using M.x where an int is needed must succeed.
        val_fn(
            "use_it",
            vec![],
            Some(te_name("int", vec![])),
            Expr::Var {
                span: sp(),
                path: vec![ident("M")],
                name: intern("x"),
            },
        ),
    ];
    let (_, _, out) = elaborate(binds).unwrap();
    // Nothing stays abstract after the refinement.
    assert!(out.opaques.is_empty());
}

#[test]
fn with_type_on_transparent_type_is_rejected() {
    // S declares t transparently; refining it is an error.
    let sig_s = sig_decls(vec![SigDecl::Type(vec![TypeDefBinding {
        span: sp(),
        name: ident("t"),
        params: vec![],
        def: TypeDefBody::Synonym(te_name("int", vec![])),
    }])]);
    let refined = SigExpr::WithType {
        span: sp(),
        base: Box::new(sig_s),
        name: ident("t"),
        params: vec![],
        body: te_name("bool", vec![]),
    };
    let binds = vec![Bind {
        span: sp(),
        kind: BindKind::Sig {
            name: ident("S2"),
            sig: refined,
        },
    }];
    let err = elaborate(binds).unwrap_err();
    assert!(matches!(err, TypeError::CannotRestrictTransparentType { .. }));
}

#[test]
fn functor_application_substitutes_the_argument() {
    // signature S = sig type t  val zero : t end
    // module F = fun(X : S) -> struct val get() : X.t = X.zero() end
    //   — simpler: struct val got : X.t = X.zero end
    // module A = struct type t = int  val zero : t = 0 end
    // module B = F(A)   — B.got : int
    let sig_s = sig_decls(vec![opaque_decl("t"), val_decl("zero", te_name("t", vec![]))]);
    let functor = ModExpr::Functor {
        span: sp(),
        param: ident("X"),
        domain: sig_s,
        body: Box::new(struct_of(vec![val_fn(
            "got",
            vec![],
            Some(te_proj("X", "t")),
            Expr::Var {
                span: sp(),
                path: vec![ident("X")],
                name: intern("zero"),
            },
        )])),
    };
    let module_a = struct_of(vec![
        Bind {
            span: sp(),
            kind: BindKind::Type(vec![TypeDefBinding {
                span: sp(),
                name: ident("t"),
                params: vec![],
                def: TypeDefBody::Synonym(te_name("int", vec![])),
            }]),
        },
        val_fn("zero", vec![], Some(te_name("t", vec![])), int(0)),
    ]);
    let binds = vec![
        Bind {
            span: sp(),
            kind: BindKind::Module {
                name: ident("F"),
                sig: None,
                body: functor,
            },
        },
        Bind {
            span: sp(),
            kind: BindKind::Module {
                name: ident("A"),
                sig: None,
                body: module_a,
            },
        },
        Bind {
            span: sp(),
            kind: BindKind::Module {
                name: ident("B"),
                sig: None,
                body: ModExpr::Apply {
                    span: sp(),
                    callee: Box::new(ModExpr::Var {
                        span: sp(),
                        name: intern("F"),
                    }),
                    arg: Box::new(ModExpr::Var {
                        span: sp(),
                        name: intern("A"),
                    }),
                },
            },
        },
        // B.got must be usable at int.
        val_fn(
            "use_it",
            vec![],
            Some(te_name("int", vec![])),
            Expr::Var {
                span: sp(),
                path: vec![ident("B")],
                name: intern("got"),
            },
        ),
    ];
    elaborate(binds).unwrap();
}

#[test]
fn duplicate_binding_conflicts_in_signature() {
    let binds = vec![val_value("x", int(1)), val_value("x", int(2))];
    let err = elaborate(binds).unwrap_err();
    assert!(matches!(
        err,
        TypeError::ConflictInSignature { name, .. } if name == intern("x")
    ));
}

#[test]
fn include_merges_entries_in_order() {
    // module Base = struct val one = 1 end
    // include Base  val two = 2
    let binds = vec![
        Bind {
            span: sp(),
            kind: BindKind::Module {
                name: ident("Base"),
                sig: None,
                body: struct_of(vec![val_value("one", int(1))]),
            },
        },
        Bind {
            span: sp(),
            kind: BindKind::Include {
                body: ModExpr::Var {
                    span: sp(),
                    name: intern("Base"),
                },
            },
        },
        val_value("two", int(2)),
    ];
    let (_, _, out) = elaborate(binds).unwrap();
    let order: Vec<(Namespace, String)> = out
        .record
        .iter()
        .map(|(ns, name, _)| (ns, sestc::interner::name_of(name)))
        .collect();
    assert_eq!(
        order,
        vec![
            (Namespace::Module, "Base".to_string()),
            (Namespace::Val, "one".to_string()),
            (Namespace::Val, "two".to_string()),
        ]
    );
    assert!(out.record.find_val(intern("one")).is_some());
}

#[test]
fn labeled_argument_errors_are_precise() {
    let (mut ctx, prims, env) = setup_expr();
    // fun(-mode m) -> m   applied without the label
    let callee = Expr::Lambda {
        span: sp(),
        params: Params {
            ordered: vec![],
            labeled: vec![LabeledParam {
                label: ident("mode"),
                param: param("m"),
            }],
            optional: vec![],
        },
        body: Box::new(Body::Pure(var("m"))),
    };
    let missing = Expr::Apply {
        span: sp(),
        callee: Box::new(callee.clone()),
        args: Args::default(),
    };
    let err = infer_expr(&mut ctx, &prims, &env, &missing).unwrap_err();
    assert!(matches!(
        err,
        TypeError::MissingMandatoryLabel { label, .. } if label == intern("mode")
    ));

    let unexpected = Expr::Apply {
        span: sp(),
        callee: Box::new(callee),
        args: Args {
            ordered: vec![],
            labeled: vec![(ident("mode"), int(1)), (ident("extra"), int(2))],
            optional: vec![],
        },
    };
    let err = infer_expr(&mut ctx, &prims, &env, &unexpected).unwrap_err();
    assert!(matches!(
        err,
        TypeError::UnexpectedMandatoryLabel { label, .. } if label == intern("extra")
    ));
}

#[test]
fn optional_arguments_take_defaults_and_extend_rows() {
    let (mut ctx, prims, env) = setup_expr();
    // fun(x, ?scale s = 10) -> x   — callers may omit ?scale
    let callee = Expr::Lambda {
        span: sp(),
        params: Params {
            ordered: vec![param("x")],
            labeled: vec![],
            optional: vec![OptionalParam {
                label: ident("scale"),
                param: param("s"),
                default: Some(int(10)),
            }],
        },
        body: Box::new(Body::Pure(var("x"))),
    };
    let without = app(callee.clone(), vec![int(1)]);
    assert_eq!(
        infer_expr(&mut ctx, &prims, &env, &without).unwrap(),
        Type::int()
    );

    let with = Expr::Apply {
        span: sp(),
        callee: Box::new(callee.clone()),
        args: Args {
            ordered: vec![int(1)],
            labeled: vec![],
            optional: vec![(ident("scale"), int(3))],
        },
    };
    assert_eq!(
        infer_expr(&mut ctx, &prims, &env, &with).unwrap(),
        Type::int()
    );

    // Wrongly-typed optional argument is caught.
    let bad = Expr::Apply {
        span: sp(),
        callee: Box::new(callee.clone()),
        args: Args {
            ordered: vec![int(1)],
            labeled: vec![],
            optional: vec![(ident("scale"), boolean(true))],
        },
    };
    assert!(infer_expr(&mut ctx, &prims, &env, &bad).is_err());

    // Unknown optional label is caught.
    let unknown = Expr::Apply {
        span: sp(),
        callee: Box::new(callee),
        args: Args {
            ordered: vec![int(1)],
            labeled: vec![],
            optional: vec![(ident("retries"), int(3))],
        },
    };
    let err = infer_expr(&mut ctx, &prims, &env, &unknown).unwrap_err();
    assert!(matches!(
        err,
        TypeError::UnexpectedOptionalLabel { label, .. } if label == intern("retries")
    ));
}

#[test]
fn pattern_cannot_bind_twice() {
    let (mut ctx, prims, env) = setup_expr();
    let expr = Expr::Case {
        span: sp(),
        scrutinee: Box::new(Expr::Tuple {
            span: sp(),
            items: vec![int(1), int(2)],
        }),
        arms: vec![CaseArm {
            span: sp(),
            pattern: Pattern::Tuple {
                span: sp(),
                items: vec![
                    Pattern::Var {
                        span: sp(),
                        name: intern("x"),
                    },
                    Pattern::Var {
                        span: sp(),
                        name: intern("x"),
                    },
                ],
            },
            body: var("x"),
        }],
    };
    let err = infer_expr(&mut ctx, &prims, &env, &expr).unwrap_err();
    assert!(matches!(
        err,
        TypeError::BoundMoreThanOnceInPattern { name, .. } if name == intern("x")
    ));
}

#[test]
fn format_literal_types_its_holes() {
    let (mut ctx, prims, env) = setup_expr();
    let lit = Expr::Literal {
        span: sp(),
        lit: Literal::Format(vec![
            FormatSegment::Text("value: ".to_string()),
            FormatSegment::Hole(HoleCode::Fixed),
            FormatSegment::Hole(HoleCode::Char),
        ]),
    };
    let ty = infer_expr(&mut ctx, &prims, &env, &lit).unwrap();
    assert_eq!(
        ty,
        TypeF::Data(
            TypeId::Variant(prims.format),
            vec![TypeF::Product(vec![Type::float(), Type::char()])]
        )
    );
}

#[test]
fn freeze_builds_a_frozen_closure() {
    // val target(x, y) = receive-free effectful body? freeze requires an
    // effectful global; use send as the target through a wrapper module.
    // Simpler: external val tick : fun(int, int) -[bool]-> unit, arity 2
    let external = Bind {
        span: sp(),
        kind: BindKind::Val(ValBinding::External {
            name: ident("tick"),
            scheme: TypeSchemeExpr {
                span: sp(),
                type_params: vec![],
                row_params: vec![],
                body: TypeExpr::EffFun {
                    span: sp(),
                    domain: DomainExpr {
                        ordered: vec![te_name("int", vec![]), te_name("int", vec![])],
                        labeled: vec![],
                        optional: OptRowExpr::Fixed(vec![]),
                    },
                    recv: Box::new(te_name("bool", vec![])),
                    codomain: Box::new(te_name("unit", vec![])),
                },
            },
            arity: 2,
        }),
    };
    let frozen = Expr::Freeze {
        span: sp(),
        path: vec![],
        name: intern("tick"),
        args: vec![FrozenArg::Given(int(1)), FrozenArg::Hole(sp())],
    };
    let binds = vec![external, val_value("partial", frozen)];
    let (_, _, out) = elaborate(binds).unwrap();
    let partial = &out.record.find_val(intern("partial")).unwrap().pty;
    let TypeF::Frozen(f) = partial else {
        panic!("expected frozen type, got {partial}");
    };
    // One hole remains.
    assert_eq!(f.rest.ordered.len(), 1);
    assert_eq!(f.rest.ordered[0], TypeF::Base(sestc::typechecker::types::BaseType::Int));
    assert_eq!(f.recv, TypeF::Base(sestc::typechecker::types::BaseType::Bool));
    assert_eq!(f.ret, TypeF::Base(sestc::typechecker::types::BaseType::Unit));
}

#[test]
fn freeze_requires_a_global_name() {
    let (mut ctx, prims, env) = setup_expr();
    // fun g -> freeze g(_) — g is expression-level, not a global.
    let expr = lambda(
        vec![param("g")],
        Expr::Freeze {
            span: sp(),
            path: vec![],
            name: intern("g"),
            args: vec![FrozenArg::Hole(sp())],
        },
    );
    let err = infer_expr(&mut ctx, &prims, &env, &expr).unwrap_err();
    assert!(matches!(err, TypeError::CannotFreezeNonGlobalName { .. }));
}

#[test]
fn expression_letrec_supports_mutual_recursion() {
    let (mut ctx, prims, env) = setup_expr();
    // let rec is_even(n) = if eq(n, 0) then true else is_odd(n)
    //     and is_odd(n) = if eq(n, 0) then false else is_even(n)
    // in is_even(10)
    // Arithmetic is out of scope here, so recursion goes through the
    // same argument; only the typing is under test.
    let mut env = env;
    // eq : fun(int, int) -> bool as a pre-bound local helper.
    {
        use sestc::ir::LocalName;
        use sestc::typechecker::env::{ValEntry, ValName};
        use sestc::typechecker::types::Domain;
        let eq_ty = Type::fun(
            Domain::ordered(vec![Type::int(), Type::int()]),
            Type::bool(),
        );
        env.add_val(
            intern("eq"),
            ValEntry {
                pty: sestc::typechecker::poly::lift(&eq_ty),
                name: ValName::Local(LocalName {
                    serial: 9999,
                    ident: intern("eq"),
                }),
            },
        );
    }
    let call_eq_zero = app(var("eq"), vec![var("n"), int(0)]);
    let rec = |name: &str, then_val: bool, other: &str| RecBinding {
        span: sp(),
        name: ident(name),
        params: ordered_params(vec![param("n")]),
        ret: None,
        body: Body::Pure(Expr::If {
            span: sp(),
            cond: Box::new(call_eq_zero.clone()),
            then_branch: Box::new(boolean(then_val)),
            else_branch: Box::new(app(var(other), vec![var("n")])),
        }),
    };
    let expr = Expr::LetRec {
        span: sp(),
        binds: vec![rec("is_even", true, "is_odd"), rec("is_odd", false, "is_even")],
        body: Box::new(app(var("is_even"), vec![int(10)])),
    };
    let ty = infer_expr(&mut ctx, &prims, &env, &expr).unwrap();
    assert_eq!(ty, Type::bool());
}

#[test]
fn row_variable_keeps_union_of_optional_labels() {
    let (mut ctx, prims, env) = setup_expr();
    // fun f -> (f(?a 1), f(?b true)) : the callee's optional row must
    // accumulate both labels.
    let use_f = |label: &str, arg: Expr| Expr::Apply {
        span: sp(),
        callee: Box::new(var("f")),
        args: Args {
            ordered: vec![],
            labeled: vec![],
            optional: vec![(ident(label), arg)],
        },
    };
    let expr = lambda(
        vec![param("f")],
        Expr::Tuple {
            span: sp(),
            items: vec![use_f("a", int(1)), use_f("b", boolean(true))],
        },
    );
    let ty = infer_expr(&mut ctx, &prims, &env, &expr).unwrap();
    let TypeF::Fun(outer_domain, _) = &ty else {
        panic!("expected function, got {ty}");
    };
    let TypeF::Fun(f_domain, _) = &outer_domain.ordered[0] else {
        panic!("expected function parameter, got {}", outer_domain.ordered[0]);
    };
    let RowF::Var(RowVar::Free(frid)) = &f_domain.optional else {
        panic!("expected free row variable in the optional row");
    };
    let kind = ctx.rv_kind(*frid);
    assert_eq!(kind.get(&intern("a")), Some(&Type::int()));
    assert_eq!(kind.get(&intern("b")), Some(&Type::bool()));
}
