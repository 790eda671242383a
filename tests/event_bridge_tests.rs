#![cfg(feature = "ecmascript")]

mod common;

use common::{recording, transform, Harness};
use vrml_script_bridge::report::Severity;
use vrml_script_bridge::scripting::{ScriptError, WrapperState};
use vrml_script_bridge::{AccessType, BasicNode, FieldData, FieldType, Profile};

fn float_in_out(direct_output: bool) -> BasicNode {
    BasicNode::script(direct_output)
        .with_field("set_in", AccessType::EventIn, FieldType::SFFloat, None)
        .with_field("value", AccessType::EventOut, FieldType::SFFloat, None)
}

#[test]
fn test_idle_script_sends_nothing() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(float_in_out(false));
    let mut wrapper = harness.load("function set_in(v) { value = v; }", &node);

    assert_eq!(wrapper.state(), WrapperState::Initialized);
    assert!(!wrapper.send_events());
    wrapper.update_event_outs();
    assert!(rec.borrow().writes.is_empty());
}

#[test]
fn test_event_in_sets_event_out() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(float_in_out(false));
    let mut wrapper = harness.load("function set_in(v) { value = v * 2; }", &node);

    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(3.0));
    assert!(wrapper.send_events());
    wrapper.update_event_outs();

    let rec = rec.borrow();
    assert_eq!(rec.writes.len(), 1);
    assert_eq!(rec.writes[0], (rec.index("value"), FieldData::Float(6.0)));
    assert_eq!(harness.sink.warning_count(), 0);
    assert_eq!(harness.sink.error_count(), 0);
}

#[test]
fn test_drain_is_exactly_once() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(float_in_out(false));
    let mut wrapper = harness.load("function set_in(v) { value = v; }", &node);

    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(1.0));
    assert!(Harness::flush(&mut wrapper));
    assert!(!wrapper.send_events());
    wrapper.update_event_outs();
    assert_eq!(rec.borrow().writes.len(), 1);

    // Re-dirtied in a later frame, delivered again.
    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(1.0));
    assert!(Harness::flush(&mut wrapper));
    assert_eq!(rec.borrow().writes.len(), 2);
}

#[test]
fn test_own_event_out_is_never_delivered() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(float_in_out(false));
    let mut wrapper = harness.load(
        r#"
        function value(v) { print("reflected"); }
        function set_in(v) { value = v; }
        "#,
        &node,
    );

    wrapper.queue_event(FieldType::SFFloat, "value", &FieldData::Float(5.0));
    assert!(harness.sink.messages.borrow().is_empty());
    assert!(!wrapper.send_events());
    assert!(rec.borrow().writes.is_empty());
}

#[test]
fn test_host_fields_are_not_events() {
    let harness = Harness::new(Profile::Vrml97);
    let (_rec, node) = recording(float_in_out(false));
    let mut wrapper = harness.load(
        r#"
        function url(v) { print("url"); }
        function directOutput(v) { print("directOutput"); }
        function initialize() { print(typeof mustEvaluate); }
        "#,
        &node,
    );

    wrapper.queue_event(
        FieldType::MFString,
        "url",
        &FieldData::StringArray(vec!["other.js".into()]),
    );
    wrapper.queue_event(FieldType::SFBool, "directOutput", &FieldData::Bool(true));
    assert_eq!(*harness.sink.messages.borrow(), vec!["undefined".to_string()]);
}

#[test]
fn test_sequential_events_see_previous_state() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(
        BasicNode::script(false)
            .with_field("set_in", AccessType::EventIn, FieldType::SFFloat, None)
            .with_field("trace", AccessType::EventOut, FieldType::SFString, None),
    );
    let mut wrapper = harness.load(
        r#"
        var seen = "";
        function set_in(v) { seen = seen + v + ";"; trace = seen; }
        "#,
        &node,
    );

    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(1.0));
    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(2.0));
    assert!(Harness::flush(&mut wrapper));

    let rec = rec.borrow();
    assert_eq!(rec.writes_to("trace"), vec![FieldData::String("1;2;".into())]);
}

#[test]
fn test_wrong_type_output_is_dropped_with_one_warning() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(float_in_out(false));
    let mut wrapper = harness.load(r#"function set_in(v) { value = "oops"; }"#, &node);

    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(1.0));
    assert!(wrapper.send_events());
    wrapper.update_event_outs();

    let rec = rec.borrow();
    assert!(rec.writes.is_empty());
    assert_eq!(rec.value("value"), FieldData::Float(0.0));
    assert_eq!(harness.sink.warning_count(), 1);
    assert!(harness.sink.warnings.borrow()[0].contains("value"));
    assert_eq!(harness.sink.error_count(), 0);
}

#[test]
fn test_initialize_only_field_never_written_back() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(
        BasicNode::script(false)
            .with_field("poke", AccessType::EventIn, FieldType::SFBool, None)
            .with_field(
                "pos",
                AccessType::Field,
                FieldType::SFVec3f,
                Some(FieldData::FloatArray(vec![1.0, 1.0, 1.0])),
            )
            .with_field("count", AccessType::Field, FieldType::SFInt32, None),
    );
    let mut wrapper = harness.load(
        r#"
        function poke(v) {
            pos.x = 5;
            pos = new SFVec3f(9, 9, 9);
            count = count + 1;
        }
        "#,
        &node,
    );

    wrapper.queue_event(FieldType::SFBool, "poke", &FieldData::Bool(true));
    assert!(!Harness::flush(&mut wrapper));
    wrapper.update_event_outs();

    let rec = rec.borrow();
    assert!(rec.writes.is_empty());
    assert_eq!(rec.value("pos"), FieldData::FloatArray(vec![1.0, 1.0, 1.0]));
    assert_eq!(rec.value("count"), FieldData::Int32(0));
}

#[test]
fn test_read_only_node_reference_rejects_writes() {
    let harness = Harness::new(Profile::Vrml97);
    let (target_rec, target) = recording(transform());
    let (rec, node) = recording(
        BasicNode::script(false)
            .with_field("poke", AccessType::EventIn, FieldType::SFBool, None)
            .with_field(
                "target",
                AccessType::Field,
                FieldType::SFNode,
                Some(FieldData::Node(Some(target))),
            ),
    );
    let mut wrapper = harness.load(
        r#"
        function poke(v) {
            target.translation = new SFVec3f(1, 2, 3);
            target.rotation.angle = 1;
        }
        "#,
        &node,
    );

    wrapper.queue_event(FieldType::SFBool, "poke", &FieldData::Bool(true));
    assert!(!Harness::flush(&mut wrapper));
    assert!(target_rec.borrow().writes.is_empty());
    assert!(rec.borrow().writes.is_empty());
    assert_eq!(harness.sink.warning_count(), 2);
    assert_eq!(harness.sink.error_count(), 0);
}

#[test]
fn test_direct_output_forwards_nested_edit_to_target() {
    let harness = Harness::new(Profile::Vrml97);
    let (target_rec, target) = recording(transform());
    let (rec, node) = recording(
        BasicNode::script(true)
            .with_field("poke", AccessType::EventIn, FieldType::SFBool, None)
            .with_field(
                "target",
                AccessType::Field,
                FieldType::SFNode,
                Some(FieldData::Node(Some(target))),
            ),
    );
    let mut wrapper = harness.load("function poke(v) { target.translation.y = 5; }", &node);
    assert!(wrapper.direct_output());

    wrapper.queue_event(FieldType::SFBool, "poke", &FieldData::Bool(true));
    assert!(wrapper.send_events());
    wrapper.update_event_outs();

    let target_rec = target_rec.borrow();
    assert_eq!(
        target_rec.writes,
        vec![(
            target_rec.index("translation"),
            FieldData::FloatArray(vec![0.0, 5.0, 0.0])
        )]
    );
    assert!(rec.borrow().writes.is_empty());

    // Drained: the next frame is quiet.
    assert!(!wrapper.send_events());
}

#[test]
fn test_direct_output_through_node_list() {
    let harness = Harness::new(Profile::X3d);
    let (target_rec, target) = recording(transform());
    let (_rec, node) = recording(
        BasicNode::script(true)
            .with_field("poke", AccessType::EventIn, FieldType::SFBool, None)
            .with_field(
                "kids",
                AccessType::Field,
                FieldType::MFNode,
                Some(FieldData::NodeArray(vec![Some(target)])),
            ),
    );
    let mut wrapper = harness.load(
        "function poke(v) { kids[0].translation = new SFVec3f(1, 2, 3); }",
        &node,
    );

    wrapper.queue_event(FieldType::SFBool, "poke", &FieldData::Bool(true));
    assert!(Harness::flush(&mut wrapper));
    assert_eq!(
        target_rec.borrow().writes_to("translation"),
        vec![FieldData::FloatArray(vec![1.0, 2.0, 3.0])]
    );
}

#[test]
fn test_node_list_event_out_sent_whole() {
    let harness = Harness::new(Profile::X3d);
    let (_target_rec, target) = recording(transform());
    let (rec, node) = recording(
        BasicNode::script(true)
            .with_field("poke", AccessType::EventIn, FieldType::SFBool, None)
            .with_field(
                "target",
                AccessType::Field,
                FieldType::SFNode,
                Some(FieldData::Node(Some(target.clone()))),
            )
            .with_field("out", AccessType::EventOut, FieldType::MFNode, None),
    );
    let mut wrapper = harness.load("function poke(v) { out = new MFNode(target); }", &node);

    wrapper.queue_event(FieldType::SFBool, "poke", &FieldData::Bool(true));
    assert!(Harness::flush(&mut wrapper));
    assert_eq!(
        rec.borrow().writes_to("out"),
        vec![FieldData::NodeArray(vec![Some(target)])]
    );
    assert!(!wrapper.send_events());
}

#[test]
fn test_events_processed_only_after_input() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(
        BasicNode::script(false)
            .with_field("set_in", AccessType::EventIn, FieldType::SFFloat, None)
            .with_field("processed", AccessType::EventOut, FieldType::SFInt32, None),
    );
    let mut wrapper = harness.load(
        r#"
        var n = 0;
        function set_in(v) { n++; }
        function eventsProcessed() { processed = n; }
        "#,
        &node,
    );

    wrapper.events_processed();
    assert!(!wrapper.send_events());

    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(1.0));
    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(2.0));
    wrapper.events_processed();
    assert!(Harness::flush(&mut wrapper));
    assert_eq!(rec.borrow().writes_to("processed"), vec![FieldData::Int32(2)]);

    wrapper.events_processed();
    assert!(!wrapper.send_events());
}

#[test]
fn test_prepare_events_is_x3d_only() {
    let source = "function prepareEvents() { ticks = ticks + 1; }";
    let script = || {
        BasicNode::script(false).with_field("ticks", AccessType::EventOut, FieldType::SFInt32, None)
    };

    let x3d = Harness::new(Profile::X3d);
    let (rec, node) = recording(script());
    let mut wrapper = x3d.load(source, &node);
    assert!(wrapper.prepare_events());
    assert!(Harness::flush(&mut wrapper));
    assert_eq!(rec.borrow().writes_to("ticks"), vec![FieldData::Int32(1)]);

    let vrml = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(script());
    let mut wrapper = vrml.load(source, &node);
    assert!(!wrapper.prepare_events());
    assert!(!Harness::flush(&mut wrapper));
    assert!(rec.borrow().writes.is_empty());
}

#[test]
fn test_timestamp_is_second_argument() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(
        BasicNode::script(false)
            .with_field("set_in", AccessType::EventIn, FieldType::SFBool, None)
            .with_field("stamp", AccessType::EventOut, FieldType::SFTime, None),
    );
    let mut wrapper = harness.load("function set_in(v, t) { stamp = t; }", &node);

    wrapper.set_timestamp(12.5);
    assert_eq!(wrapper.timestamp(), 12.5);
    wrapper.queue_event(FieldType::SFBool, "set_in", &FieldData::Bool(true));
    Harness::flush(&mut wrapper);
    assert_eq!(rec.borrow().writes_to("stamp"), vec![FieldData::Double(12.5)]);
}

#[test]
fn test_initialize_output_is_sent() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(float_in_out(false));
    let mut wrapper = harness.load("function initialize() { value = 1.5; }", &node);

    assert!(Harness::flush(&mut wrapper));
    assert_eq!(rec.borrow().writes_to("value"), vec![FieldData::Float(1.5)]);
}

#[test]
fn test_exposed_field_reads_and_writes() {
    let harness = Harness::new(Profile::X3d);
    let (rec, node) = recording(
        BasicNode::script(false)
            .with_field("poke", AccessType::EventIn, FieldType::SFBool, None)
            .with_field(
                "level",
                AccessType::ExposedField,
                FieldType::SFFloat,
                Some(FieldData::Float(0.5)),
            ),
    );
    let mut wrapper = harness.load("function poke(v) { level = level + 1; }", &node);

    // Incoming exposedField events share the eventOut name and are ignored.
    wrapper.queue_event(FieldType::SFFloat, "level", &FieldData::Float(3.0));
    assert!(!wrapper.send_events());
    wrapper.queue_event(FieldType::SFBool, "poke", &FieldData::Bool(true));
    Harness::flush(&mut wrapper);
    assert_eq!(rec.borrow().writes_to("level"), vec![FieldData::Float(1.5)]);
}

#[test]
fn test_syntax_error_is_reported_not_fatal() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(float_in_out(false));
    let mut wrapper = harness.load("function set_in(v) { value = ; }", &node);

    assert_eq!(wrapper.state(), WrapperState::Initialized);
    assert_eq!(harness.sink.error_count(), 1);
    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(1.0));
    assert!(!Harness::flush(&mut wrapper));
    assert!(rec.borrow().writes.is_empty());

    let diagnostics = harness.engine.reporter().diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, Severity::Error);
    assert_eq!(diagnostics[0].source.as_deref(), Some("test.js"));
}

#[test]
fn test_runtime_error_is_contained() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(
        float_in_out(false).with_field("ok", AccessType::EventIn, FieldType::SFFloat, None),
    );
    let mut wrapper = harness.load(
        "function set_in(v) {\n  value = v.missing.deep;\n}\nfunction ok(v) { value = v; }",
        &node,
    );

    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(1.0));
    assert_eq!(harness.sink.error_count(), 1);
    assert!(harness.sink.errors.borrow()[0].contains("in function set_in"));

    wrapper.queue_event(FieldType::SFFloat, "ok", &FieldData::Float(4.0));
    assert!(Harness::flush(&mut wrapper));
    assert_eq!(rec.borrow().writes_to("value"), vec![FieldData::Float(4.0)]);

    let diagnostics = harness.engine.reporter().diagnostics();
    assert_eq!(diagnostics[0].severity, Severity::RuntimeError);
}

#[test]
fn test_lifecycle_errors() {
    let harness = Harness::new(Profile::Vrml97);
    let (_rec, node) = recording(float_in_out(false));
    let mut wrapper = harness.load("function shutdown() { print('bye'); }", &node);

    assert!(matches!(
        wrapper.initialize(node.clone()),
        Err(ScriptError::InvalidState(_))
    ));

    wrapper.shutdown();
    wrapper.shutdown();
    assert_eq!(wrapper.state(), WrapperState::Shutdown);
    assert_eq!(*harness.sink.messages.borrow(), vec!["bye".to_string()]);

    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(1.0));
    assert!(!wrapper.send_events());
}

#[test]
fn test_unsupported_field_type_is_fatal() {
    let harness = Harness::new(Profile::Vrml97);
    let (_rec, node) = recording(
        BasicNode::script(false)
            .with_field("tint", AccessType::EventOut, FieldType::SFColorRGBA, None),
    );
    let mut wrapper = harness.engine.create_wrapper("test.js", "").unwrap();
    assert!(matches!(
        wrapper.initialize(node),
        Err(ScriptError::Configuration(_))
    ));
}

#[test]
fn test_scripts_are_isolated() {
    let harness = Harness::new(Profile::X3d);
    let (rec_a, node_a) = recording(float_in_out(false));
    let (rec_b, node_b) = recording(float_in_out(false));
    let mut a = harness.load("var shared = 1; function set_in(v) { value = shared; }", &node_a);
    let mut b = harness.load(
        "function set_in(v) { value = typeof shared === 'undefined' ? -1 : shared; }",
        &node_b,
    );

    a.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(0.0));
    b.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(0.0));
    Harness::flush(&mut a);
    Harness::flush(&mut b);
    assert_eq!(rec_a.borrow().writes_to("value"), vec![FieldData::Float(1.0)]);
    assert_eq!(rec_b.borrow().writes_to("value"), vec![FieldData::Float(-1.0)]);
}

#[test]
fn test_exposed_field_set_handler_is_called() {
    let harness = Harness::new(Profile::X3d);
    let (rec, node) = recording(
        BasicNode::script(false)
            .with_field("level", AccessType::ExposedField, FieldType::SFFloat, None)
            .with_field("out", AccessType::EventOut, FieldType::SFFloat, None),
    );
    let mut wrapper = harness.load("function set_level(v) { out = v + 1; }", &node);

    wrapper.queue_event(FieldType::SFFloat, "set_level", &FieldData::Float(3.0));
    assert!(Harness::flush(&mut wrapper));
    assert_eq!(rec.borrow().writes_to("out"), vec![FieldData::Float(4.0)]);
}

#[test]
fn test_rebound_handler_is_used() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(float_in_out(false));
    let mut wrapper = harness.load(
        r#"
        function set_in(v) {
            value = 1;
            set_in = function (v) { value = 2; };
        }
        "#,
        &node,
    );

    for _ in 0..2 {
        wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(0.0));
        Harness::flush(&mut wrapper);
    }
    assert_eq!(
        rec.borrow().writes_to("value"),
        vec![FieldData::Float(1.0), FieldData::Float(2.0)]
    );
}

#[test]
fn test_throwing_handler_skips_events_processed() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(
        BasicNode::script(false)
            .with_field("set_in", AccessType::EventIn, FieldType::SFFloat, None)
            .with_field("processed", AccessType::EventOut, FieldType::SFInt32, None),
    );
    let mut wrapper = harness.load(
        r#"
        function set_in(v) { throw new Error("bad input"); }
        function eventsProcessed() { processed = 1; }
        "#,
        &node,
    );

    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(1.0));
    wrapper.events_processed();
    assert_eq!(harness.sink.error_count(), 1);
    assert!(!Harness::flush(&mut wrapper));
    assert!(rec.borrow().writes.is_empty());
}

#[test]
fn test_oversized_growth_is_absorbed() {
    let harness = Harness::new(Profile::Vrml97);
    let (rec, node) = recording(
        BasicNode::script(false)
            .with_field("set_in", AccessType::EventIn, FieldType::SFFloat, None)
            .with_field("set_big", AccessType::EventIn, FieldType::SFBool, None)
            .with_field("out", AccessType::EventOut, FieldType::MFFloat, None)
            .with_field("count", AccessType::EventOut, FieldType::SFInt32, None),
    );
    let mut wrapper = harness.load(
        r#"
        function set_in(v) {
            out[1e18] = 1;
            out.length = 1e18;
            count = out.length;
        }
        function set_big(v) { var img = new SFImage(100000, 100000, 1); }
        "#,
        &node,
    );

    wrapper.queue_event(FieldType::SFFloat, "set_in", &FieldData::Float(0.0));
    assert_eq!(harness.sink.warning_count(), 2);
    assert!(Harness::flush(&mut wrapper));
    let rec_ref = rec.borrow();
    assert_eq!(rec_ref.writes_to("count"), vec![FieldData::Int32(0)]);
    assert!(rec_ref.writes_to("out").is_empty());
    drop(rec_ref);

    wrapper.queue_event(FieldType::SFBool, "set_big", &FieldData::Bool(true));
    assert_eq!(harness.sink.error_count(), 1);
    assert_eq!(wrapper.state(), WrapperState::Initialized);
}
