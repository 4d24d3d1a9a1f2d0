use qm_lang::{Ident, Number, Session, UnitError, UnitValue, Units};
use rstest::{fixture, rstest};

#[fixture]
fn session() -> Session {
    Session::new()
}

fn ident(name: &str) -> Ident {
    Ident::new(name)
}

#[rstest]
fn test_placeholder_pruning(mut session: Session) {
    session.analyse_line("a = b + c").unwrap();

    for name in ["b", "c"] {
        let quantity = session.quantities().get(ident(name)).unwrap();
        assert!(quantity.todo, "{name} should be a todo placeholder");
        assert_eq!(
            quantity.reverse_deps,
            [ident("a")].into_iter().collect(),
            "{name} should be referenced only by a"
        );
    }

    session.analyse_line("a = 5").unwrap();
    assert!(!session.quantities().contains(ident("b")));
    assert!(!session.quantities().contains(ident("c")));
    assert!(session.quantities().contains(ident("a")));
}

#[rstest]
fn test_fold_binder_shadows_defined_quantity(mut session: Session) {
    session.analyse_line("b = 2").unwrap();
    session.analyse_line("i = b * b").unwrap();
    session.analyse_line("k = #(i, [1,2,3], i * i, add)").unwrap();

    let k = session.quantities().get(ident("k")).unwrap();
    assert!(k.dependencies.is_empty());
    // And the binder really is bound per element: 1 + 4 + 9.
    assert_eq!(session.get_value("k").unwrap().numeric(), Number::from(14));
    // Outside the fold, `i` still means the defined quantity.
    assert_eq!(session.get_value("i").unwrap().numeric(), Number::from(4));
}

#[rstest]
fn test_nested_vector_dependencies_deduplicated(mut session: Session) {
    session.analyse_line("b = 1").unwrap();
    session.analyse_line("c = 2").unwrap();
    session.analyse_line("h = [b, x:[1, y:c, b], 3]").unwrap();

    let h = session.quantities().get(ident("h")).unwrap();
    assert_eq!(
        h.dependencies,
        [ident("b"), ident("c")].into_iter().collect()
    );
}

#[test]
fn test_unit_multiplication_commutes() {
    let a = UnitValue::number(5).with_unit(&Units::of(&[("kg", 1)]));
    let b = UnitValue::number(6).with_unit(&Units::of(&[("m", 1), ("s", -2)]));

    let ab = a.multiply(&b);
    assert_eq!(ab.numeric(), Number::from(30));
    assert_eq!(ab.units(), &Units::of(&[("kg", 1), ("m", 1), ("s", -2)]));

    let ba = b.multiply(&a);
    assert_eq!(ba.numeric(), Number::from(30));
    assert!(ab.equals(&ba));
}

#[rstest]
#[case::addition("+")]
#[case::subtraction("-")]
fn test_two_tier_unit_error_cascade(mut session: Session, #[case] op: &str) {
    session.analyse_line("a = 25 ; kg").unwrap();
    session.analyse_line("b = 24").unwrap();
    session.analyse_line(&format!("c = a {op} b")).unwrap();
    session.analyse_line(&format!("y = c {op} b")).unwrap();

    let c = session.get_value("c").unwrap();
    assert_eq!(c.error, Some(UnitError::Mismatch));
    assert_eq!(c.error.unwrap().tag(), "unitError");
    assert!(c.is_normal());

    let y = session.get_value("y").unwrap();
    assert_eq!(y.error, Some(UnitError::Unchecked));
    assert_eq!(y.error.unwrap().tag(), "uncheckedUnit");
    assert!(y.is_normal());

    // The numeric results are exactly what an error-free evaluation of the
    // same formulas would have produced.
    let (c_expected, y_expected) = match op {
        "+" => (49.0, 73.0),
        _ => (1.0, -23.0),
    };
    assert_eq!(c.numeric(), Number::new(c_expected));
    assert_eq!(y.numeric(), Number::new(y_expected));
}

#[rstest]
fn test_button_press_is_visible_for_exactly_one_step(mut session: Session) {
    session.analyse_line("fire = button()").unwrap();
    session.analyse_line("armed = fire * 1").unwrap();

    session.set_value("fire", UnitValue::bool(true)).unwrap();
    session.step().unwrap();
    assert!(session.get_value("fire").unwrap().is_truthy());
    assert_eq!(session.get_value("armed").unwrap().numeric(), Number::from(1));

    session.step().unwrap();
    assert!(!session.get_value("fire").unwrap().is_truthy());
    assert_eq!(session.get_value("armed").unwrap().numeric(), Number::from(0));
}

#[rstest]
#[case::default_untouched(None)]
#[case::explicit_value(Some(3.0))]
fn test_probe_leaves_inputs_untouched(mut session: Session, #[case] preset: Option<f64>) {
    session.analyse_line("x = slider(0, 100, 2)").unwrap();
    session.analyse_line("y = x * x").unwrap();
    if let Some(preset) = preset {
        session.set_value("x", UnitValue::number(preset)).unwrap();
    }
    let before = session.get_value("x").unwrap();

    let probed = session
        .execute_quantities(&[("x", UnitValue::number(10))], &["y"])
        .unwrap();
    assert_eq!(probed, vec![(ident("y"), UnitValue::number(100))]);

    assert_eq!(session.get_value("x").unwrap(), before);
    let y = before.numeric().value() * before.numeric().value();
    assert_eq!(session.get_value("y").unwrap().numeric(), Number::new(y));
}

#[rstest]
fn test_incremental_redefinition_keeps_dependents_live(mut session: Session) {
    session.analyse_line("total = part_a + part_b").unwrap();
    session.analyse_line("part_a = 10").unwrap();
    session.analyse_line("part_b = 5").unwrap();
    assert_eq!(session.get_value("total").unwrap().numeric(), Number::from(15));

    // Redefine a leaf; the downstream quantity follows.
    session.analyse_line("part_b = 20").unwrap();
    assert_eq!(session.get_value("total").unwrap().numeric(), Number::from(30));

    // Redefine the root away from part_b; part_b survives (it is defined),
    // and total recomputes.
    session.analyse_line("total = part_a * 3").unwrap();
    assert!(session.quantities().contains(ident("part_b")));
    assert_eq!(session.get_value("total").unwrap().numeric(), Number::from(30));
}

#[rstest]
fn test_todo_evaluates_to_nan_without_aborting(mut session: Session) {
    session.analyse_line("a = ghost * 2 + 1").unwrap();
    let a = session.get_value("a").unwrap();
    assert!(a.numeric().is_nan());
}

#[rstest]
fn test_unit_suffix_and_rendering(mut session: Session) {
    session.analyse_line("force = mass * accel").unwrap();
    session.analyse_line("mass = 25 ; kg").unwrap();
    session.analyse_line("accel = 9.81 ; m/s2").unwrap();

    let force = session.get_value("force").unwrap();
    assert_eq!(force.units(), &Units::of(&[("kg", 1), ("m", 1), ("s", -2)]));
    assert_eq!(force.to_string(), "245.25 kg.m/s2");
}

#[rstest]
fn test_guarded_strings_keep_separators(mut session: Session) {
    session
        .analyse_line(r#"label = "speed = 5; m/s""#)
        .unwrap();
    let label = session.quantities().get(ident("label")).unwrap();
    assert_eq!(label.definition, r#""speed = 5; m/s""#);
    assert!(label.unit.is_empty());
    assert_eq!(
        session.get_value("label").unwrap().to_string(),
        "speed = 5; m/s"
    );
}

#[rstest]
fn test_history_recurrence_across_steps(mut session: Session) {
    session.analyse_line("acc = acc @ 1 + inc").unwrap();
    session.analyse_line("inc = 2").unwrap();
    session.set_value("acc", UnitValue::number(0)).unwrap();

    for _ in 0..4 {
        session.step().unwrap();
    }
    assert_eq!(session.get_value("acc").unwrap().numeric(), Number::from(8));
}

#[rstest]
fn test_reset_returns_to_initial_values(mut session: Session) {
    session.analyse_line("level = slider(0, 10, 5)").unwrap();
    session.set_value("level", UnitValue::number(9)).unwrap();
    session.step().unwrap();
    session.reset().unwrap();

    assert_eq!(session.time(), 0);
    assert_eq!(session.get_value("level").unwrap().numeric(), Number::from(5));
}

#[rstest]
fn test_user_functions_and_combining(mut session: Session) {
    session.analyse_line("hypot(a, b) = sqrt(a ^ 2 + b ^ 2)").unwrap();
    session.analyse_line("d = hypot(3, 4)").unwrap();
    assert_eq!(session.get_value("d").unwrap().numeric(), Number::from(5));

    // A two-parameter function is a valid fold combiner.
    session
        .analyse_line("biggest(p, q) = max(p, q)")
        .unwrap();
    session
        .analyse_line("peak = #(v, [3, 9, 4], v, biggest)")
        .unwrap();
    assert_eq!(session.get_value("peak").unwrap().numeric(), Number::from(9));
}

#[rstest]
fn test_cyclic_definitions_error_instead_of_hanging(mut session: Session) {
    session.analyse_line("a = b + 1").unwrap();
    session.analyse_line("b = a + 1").unwrap();
    let error = session.get_value("a").unwrap_err();
    assert!(matches!(
        error.cause,
        qm_lang::InnerError::Runtime(qm_lang::RuntimeError::CyclicEvaluation(_))
    ));
}

#[test]
fn test_time_dependent_primitive_list_membership() {
    for name in [
        "slider",
        "button",
        "checkbox",
        "random",
        "time",
        "pointer_x",
        "pointer_y",
        "pointer_down",
    ] {
        assert!(
            qm_lang::TIME_DEPENDENT_PRIMITIVES.contains(&name),
            "{name} should be time-dependent"
        );
    }
    assert_eq!(qm_lang::TIME_DEPENDENT_PRIMITIVES.len(), 8);
}
