#[cfg(test)]
mod tests {
    use crate::block::Block;
    use crate::compiler::compile;
    use crate::dom::{self, Event};
    use crate::render::{NoTemplates, RenderError};
    use crate::scope::{EventOwner, Scope};
    use crate::template_set::TemplateSet;
    use crate::validate::*;
    use markup5ever_rcdom::Handle;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn mount(block: &mut Block) -> Handle {
        let container = dom::create_container();
        block.mount(&container);
        container
    }

    fn render(template: &str, context: Value) -> String {
        compile(template).unwrap().call(context).unwrap().to_string()
    }

    fn elements(parent: &Handle, tag: &str) -> Vec<Handle> {
        dom::children(parent)
            .into_iter()
            .filter(|node| dom::tag_name(node).as_deref() == Some(tag))
            .collect()
    }

    #[rstest]
    #[case("<div>hello</div>", "<div>hello</div>")]
    #[case("<div class=\"a\"><span>x</span><!-- note --></div>", "<div class=\"a\"><span>x</span><!-- note --></div>")]
    #[case("<p>a &amp; b</p>", "<p>a &amp; b</p>")]
    #[case("<div/><span/>", "<div></div><span></span>")]
    #[case("<label>name <input type=\"text\"/></label>", "<label>name <input type=\"text\"></label>")]
    #[case("<svg viewBox=\"0 0 1 1\"><path d=\"M0\"/></svg>", "<svg viewBox=\"0 0 1 1\"><path d=\"M0\"></path></svg>")]
    #[case("<!-- only -->", "<!-- only -->")]
    #[case("just text", "just text")]
    #[case("", "")]
    fn test_static_templates_render_as_written(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(render(template, json!({})), expected);
    }

    #[test]
    fn test_text_slot_patch_keeps_nodes() {
        let function = compile(r#"<div><p><t t-esc="text"/></p></div>"#).unwrap();
        let mut block = function.call(json!({"text": "foo"})).unwrap();
        let container = mount(&mut block);
        assert_eq!(dom::inner_html(&container), "<div><p>foo</p></div>");
        let paragraph = dom::find_element(&container, "p").unwrap();

        block.patch(function.call(json!({"text": "bar"})).unwrap());
        assert_eq!(dom::inner_html(&container), "<div><p>bar</p></div>");
        assert!(Rc::ptr_eq(&paragraph, &dom::find_element(&container, "p").unwrap()));
    }

    #[test]
    fn test_patch_with_same_data_is_idempotent() {
        let function = compile(r#"<ul><li t-foreach="items" t-as="i"><t t-esc="i"/></li></ul>"#).unwrap();
        let context = json!({"items": ["a", "b"]});
        let mut block = function.call(context.clone()).unwrap();
        let container = mount(&mut block);
        let before = dom::inner_html(&container);
        block.patch(function.call(context.clone()).unwrap());
        block.patch(function.call(context).unwrap());
        assert_eq!(dom::inner_html(&container), before);
    }

    #[test]
    fn test_conditional_child_added_and_removed() {
        let function = compile(r#"<div><t t-if="flag"><span>yes</span></t></div>"#).unwrap();
        let mut block = function.call(json!({"flag": true})).unwrap();
        let container = mount(&mut block);
        assert_eq!(dom::inner_html(&container), "<div><span>yes</span></div>");
        let div = dom::find_element(&container, "div").unwrap();

        block.patch(function.call(json!({"flag": false})).unwrap());
        assert_eq!(dom::inner_html(&container), "<div></div>");

        block.patch(function.call(json!({"flag": true})).unwrap());
        assert_eq!(dom::inner_html(&container), "<div><span>yes</span></div>");
        assert!(Rc::ptr_eq(&div, &dom::find_element(&container, "div").unwrap()));
    }

    #[rstest]
    #[case(json!({"n": 1}), "one")]
    #[case(json!({"n": 2}), "two")]
    #[case(json!({"n": 3}), "other")]
    fn test_if_elif_else(#[case] context: Value, #[case] expected: &str) {
        let template = r#"
            <t t-if="n == 1">one</t>
            <t t-elif="n == 2">two</t>
            <t t-else="">other</t>"#;
        assert_eq!(render(template, context), expected);
    }

    #[test]
    fn test_switching_branches_in_place() {
        let function = compile(r#"<p>before</p><t t-if="a"><b>A</b></t><t t-else=""><i>B</i></t><p>after</p>"#).unwrap();
        let mut block = function.call(json!({"a": true})).unwrap();
        let container = mount(&mut block);
        assert_eq!(dom::inner_html(&container), "<p>before</p><b>A</b><p>after</p>");

        block.patch(function.call(json!({"a": false})).unwrap());
        assert_eq!(dom::inner_html(&container), "<p>before</p><i>B</i><p>after</p>");
    }

    #[test]
    fn test_loop_over_literal_array() {
        assert_eq!(render(r#"<t t-foreach="[3, 2, 1]" t-as="item"><t t-esc="item"/></t>"#, json!({})), "321");
    }

    #[test]
    fn test_loop_variables() {
        let template = r#"<t t-foreach="items" t-as="i"><t t-esc="i_index"/><t t-esc="i"/><t t-if="i_last">.</t></t>"#;
        assert_eq!(render(template, json!({"items": ["a", "b"]})), "0a1b.");

        let template = r#"<t t-foreach="map" t-as="k"><t t-esc="k"/>=<t t-esc="k_value"/>;</t>"#;
        assert_eq!(render(template, json!({"map": {"x": 1, "y": 2}})), "x=1;y=2;");
    }

    #[test]
    fn test_loop_items_get_their_own_scope() {
        let template = r#"<t t-foreach="items" t-as="i"><t t-set="last" t-value="i"/><t t-esc="last"/></t><t t-esc="last or 'unset'"/>"#;
        assert_eq!(render(template, json!({"items": [1, 2]})), "12unset");
    }

    #[test]
    fn test_keyed_items_move_with_their_nodes() {
        let function = compile(
            r#"<ul><li t-foreach="items" t-as="item" t-key="item.id"><t t-esc="item.name"/></li></ul>"#,
        )
        .unwrap();
        let mut block = function
            .call(json!({"items": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}, {"id": 3, "name": "c"}]}))
            .unwrap();
        let container = mount(&mut block);
        let ul = dom::find_element(&container, "ul").unwrap();
        let before = elements(&ul, "li");
        assert_eq!(before.len(), 3);

        block.patch(
            function
                .call(json!({"items": [{"id": 3, "name": "c"}, {"id": 1, "name": "A"}]}))
                .unwrap(),
        );
        assert_eq!(dom::inner_html(&container), "<ul><li>c</li><li>A</li></ul>");
        let after = elements(&ul, "li");
        assert!(Rc::ptr_eq(&after[0], &before[2]));
        assert!(Rc::ptr_eq(&after[1], &before[0]));
    }

    #[test]
    fn test_unkeyed_items_grow_and_shrink() {
        let function = compile(r#"<ul><li t-foreach="items" t-as="i"><t t-esc="i"/></li></ul>"#).unwrap();
        let mut block = function.call(json!({"items": [1]})).unwrap();
        let container = mount(&mut block);

        block.patch(function.call(json!({"items": [1, 2, 3]})).unwrap());
        assert_eq!(dom::inner_html(&container), "<ul><li>1</li><li>2</li><li>3</li></ul>");

        block.patch(function.call(json!({"items": []})).unwrap());
        assert_eq!(dom::inner_html(&container), "<ul></ul>");
    }

    #[test]
    fn test_invalid_loop_collection() {
        let function = compile(r#"<t t-foreach="count" t-as="x">a</t>"#).unwrap();
        let err = function.call(json!({"count": 3})).unwrap_err();
        assert!(matches!(err, RenderError::InvalidLoopExpression(_)));
    }

    #[test]
    fn test_esc_default_and_escaping() {
        assert_eq!(render(r#"<p t-esc="missing">none</p>"#, json!({})), "<p>none</p>");
        assert_eq!(render(r#"<p t-esc="zero">none</p>"#, json!({"zero": 0})), "<p>0</p>");
        assert_eq!(
            render(r#"<p><t t-esc="html"/></p>"#, json!({"html": "<b>x</b>"})),
            "<p>&lt;b&gt;x&lt;/b&gt;</p>"
        );
    }

    #[test]
    fn test_raw_inserts_markup() {
        let function = compile(r#"<div><t t-raw="html"/></div>"#).unwrap();
        let mut block = function.call(json!({"html": "<b>x</b>"})).unwrap();
        let container = mount(&mut block);
        assert_eq!(dom::inner_html(&container), "<div><b>x</b></div>");

        block.patch(function.call(json!({"html": "<i>y</i>"})).unwrap());
        assert_eq!(dom::inner_html(&container), "<div><i>y</i></div>");
        assert_eq!(render(r#"<t t-raw="none"><em>fallback</em></t>"#, json!({})), "<em>fallback</em>");
    }

    #[test]
    fn test_dynamic_attributes() {
        let function = compile(r#"<div class="base" t-att-title="title" t-attf-class="item {{extra}}"/>"#).unwrap();
        let mut block = function.call(json!({"title": "t", "extra": "x"})).unwrap();
        let container = mount(&mut block);
        let div = dom::find_element(&container, "div").unwrap();
        assert_eq!(dom::get_attribute(&div, "title").as_deref(), Some("t"));
        assert_eq!(dom::get_attribute(&div, "class").as_deref(), Some("base item x"));

        block.patch(function.call(json!({"title": null, "extra": "y"})).unwrap());
        assert_eq!(dom::get_attribute(&div, "title"), None);
        assert_eq!(dom::get_attribute(&div, "class").as_deref(), Some("base item y"));
    }

    #[test]
    fn test_class_object_toggles_tokens() {
        let function = compile(r#"<span t-att-class="{active: on, hidden: !on}"/>"#).unwrap();
        let mut block = function.call(json!({"on": true})).unwrap();
        let container = mount(&mut block);
        let span = dom::find_element(&container, "span").unwrap();
        assert_eq!(dom::get_attribute(&span, "class").as_deref(), Some("active"));

        block.patch(function.call(json!({"on": false})).unwrap());
        assert_eq!(dom::get_attribute(&span, "class").as_deref(), Some("hidden"));
    }

    #[test]
    fn test_set_does_not_leak_into_caller_scope() {
        let function = compile(r#"<t t-set="x" t-value="1"/><t t-esc="x"/>"#).unwrap();
        assert!(function.protects_scope());
        let scope = Scope::new(json!({}));
        let block = function.render(&scope, &NoTemplates).unwrap();
        assert_eq!(block.to_string(), "1");
        assert_eq!(scope.lookup("x"), None);
    }

    #[test]
    fn test_set_body_and_default() {
        assert_eq!(
            render(r#"<t t-set="v">fallback</t><t t-esc="v"/>"#, json!({})),
            "fallback"
        );
        assert_eq!(
            render(r#"<t t-set="v" t-value="given">fallback</t><t t-esc="v"/>"#, json!({"given": "g"})),
            "g"
        );
        assert_eq!(
            render(r#"<t t-set="v"><b>bold</b></t><t t-raw="v"/>"#, json!({})),
            "<b>bold</b>"
        );
    }

    #[rstest]
    #[case(r#"<div><t t-set="v" t-value="0">dflt</t><t t-esc="v"/></div>"#, "<div>0</div>")]
    #[case(r#"<div><t t-set="v" t-value="''">dflt</t>[<t t-esc="v"/>]</div>"#, "<div>[]</div>")]
    #[case(r#"<div><t t-set="v" t-value="0"><b>dflt</b></t><t t-esc="v"/></div>"#, "<div>0</div>")]
    #[case(r#"<div><t t-set="v" t-value="false">dflt</t><t t-esc="v"/></div>"#, "<div>dflt</div>")]
    #[case(r#"<div><t t-set="v" t-value="missing">dflt</t><t t-esc="v"/></div>"#, "<div>dflt</div>")]
    fn test_set_value_falls_back_only_on_null_or_false(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(render(template, json!({})), expected);
    }

    fn card_set() -> TemplateSet {
        let mut set = TemplateSet::new();
        set.add("card", r#"<div class="card"><t t-esc="title"/><t t-raw="0"/></div>"#);
        set.add(
            "main",
            r#"<t t-call="card"><t t-set="title" t-value="'Hello'"/><b>body</b></t><span t-esc="title or 'none'"/>"#,
        );
        set
    }

    #[test]
    fn test_call_with_body() {
        let set = card_set();
        assert_eq!(
            set.render_to_string("main", json!({})).unwrap(),
            r#"<div class="card">Hello<b>body</b></div><span>none</span>"#
        );
    }

    #[test]
    fn test_dynamic_call_name() {
        let mut set = card_set();
        set.add("picker", r#"<t t-call="{{kind}}"/>"#);
        assert_eq!(
            set.render_to_string("picker", json!({"kind": "card", "title": "T"})).unwrap(),
            r#"<div class="card">T</div>"#
        );
    }

    #[test]
    fn test_missing_template() {
        let mut set = TemplateSet::new();
        set.add("main", r#"<div><t t-call="missing"/></div>"#);
        let err = set.render("main", json!({})).unwrap_err();
        assert_eq!(err, RenderError::MissingTemplate("missing".to_string()));
        assert_eq!(err.to_string(), "Missing template: \"missing\"");
        assert_eq!(
            set.render("nope", json!({})).unwrap_err(),
            RenderError::MissingTemplate("nope".to_string())
        );
    }

    #[test]
    fn test_replacing_a_template_recompiles_it() {
        let mut set = TemplateSet::new();
        set.add("main", "<p>one</p>");
        assert_eq!(set.render_to_string("main", json!({})).unwrap(), "<p>one</p>");
        set.add("main", "<p>two</p>");
        assert_eq!(set.render_to_string("main", json!({})).unwrap(), "<p>two</p>");
    }

    #[test]
    fn test_compile_error_surfaces_through_template_set() {
        let mut set = TemplateSet::new();
        set.add("bad", "<div>");
        let Err(RenderError::Compile(err)) = set.render("bad", json!({})) else {
            panic!("expected a compile error");
        };
        assert_eq!(err.code, ERR_INVALID_XML);
        assert_eq!(err.file, "bad");
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<(String, Vec<Value>)>>,
    }

    impl EventOwner for Recorder {
        fn handle_event(&self, method: &str, args: &[Value], _event: &Event) {
            self.calls.borrow_mut().push((method.to_string(), args.to_vec()));
        }
    }

    #[test]
    fn test_event_handlers_reach_owner() {
        let mut set = TemplateSet::new();
        set.add("button", r#"<div><button t-on-click="select(id)">go</button></div>"#);
        let recorder = Rc::new(Recorder::default());

        let mut block = set
            .render_with_owner("button", json!({"id": 7}), recorder.clone())
            .unwrap();
        let container = mount(&mut block);
        let button = dom::find_element(&container, "button").unwrap();
        assert_eq!(dom::dispatch_event(&button, &Event::new("click")), 1);

        block.patch(
            set.render_with_owner("button", json!({"id": 8}), recorder.clone())
                .unwrap(),
        );
        dom::dispatch_event(&button, &Event::new("click"));

        assert_eq!(
            *recorder.calls.borrow(),
            vec![
                ("select".to_string(), vec![json!(7)]),
                ("select".to_string(), vec![json!(8)]),
            ]
        );
    }

    #[test]
    fn test_slot_counts() {
        let function = compile(
            r#"<div t-att-id="id" t-on-click="go"><t t-esc="a"/><t t-if="b">x</t><t t-foreach="c" t-as="i">y</t></div>"#,
        )
        .unwrap();
        assert_eq!(function.fragments().len(), 1);
        let fragment = &function.fragments()[0];
        assert_eq!(fragment.data_count(), 2);
        assert_eq!(fragment.handler_count(), 1);
        assert_eq!(fragment.child_count(), 2);
    }

    #[rstest]
    #[case(r#"<button t-on-click="a + b"/>"#, ERR_UNSUPPORTED_HANDLER)]
    #[case(r#"<p t-esc="a +"/>"#, ERR_INVALID_EXPRESSION)]
    #[case(r#"<div t-if="a">a</div><p>b</p><div t-else="">c</div>"#, ERR_BRANCH_WITHOUT_OPENER)]
    fn test_compile_errors(#[case] template: &str, #[case] code: &str) {
        assert_eq!(compile(template).unwrap_err().code, code);
    }
}
