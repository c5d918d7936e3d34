#[cfg(test)]
mod tests {
    use crate::config::CompileOptions;
    use crate::parse::parse_template;
    use crate::validate::*;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> TemplateNode {
        parse_template(text, &CompileOptions::default()).unwrap()
    }

    fn parse_err(text: &str) -> CompilerError {
        parse_template(text, &CompileOptions::default().named("broken")).unwrap_err()
    }

    fn text(value: &str) -> TemplateNode {
        TemplateNode::Text(TextNode {
            value: value.to_string(),
        })
    }

    fn element(tag: &str, children: Vec<TemplateNode>) -> TemplateNode {
        TemplateNode::Element(ElementNode {
            tag: tag.to_string(),
            attributes: vec![],
            on: vec![],
            children,
        })
    }

    #[test]
    fn test_empty_template_is_empty_text() {
        assert_eq!(parse(""), text(""));
        assert_eq!(parse("\n   \n"), text(""));
    }

    #[test]
    fn test_plain_markup() {
        assert_eq!(
            parse("<div>\n  <span>hello   world</span>\n</div>"),
            element("div", vec![element("span", vec![text("hello world")])])
        );
    }

    #[test]
    fn test_pre_keeps_whitespace() {
        let ast = parse("<pre>a\n   b</pre>");
        assert_eq!(ast, element("pre", vec![text("a\n   b")]));
    }

    #[test]
    fn test_preserve_whitespace_option() {
        let options = CompileOptions {
            preserve_whitespace: true,
            ..CompileOptions::default()
        };
        let ast = parse_template("<p>a   b</p>", &options).unwrap();
        assert_eq!(ast, element("p", vec![text("a   b")]));
    }

    #[test]
    fn test_esc_on_element_wraps_content() {
        assert_eq!(
            parse(r#"<p t-esc="value">default</p>"#),
            element(
                "p",
                vec![TemplateNode::Esc(EscNode {
                    expr: "value".to_string(),
                    default_value: "default".to_string(),
                })]
            )
        );
    }

    #[test]
    fn test_if_chain_collects_elif_and_else() {
        let ast = parse(
            r#"<t t-if="a">A</t>
               <t t-elif="b">B</t>
               <t t-else="">C</t>"#,
        );
        let TemplateNode::If(conditional) = ast else {
            panic!("expected a conditional, got {:?}", ast);
        };
        assert_eq!(conditional.condition, "a");
        assert_eq!(*conditional.content, text("A"));
        assert_eq!(conditional.elifs.len(), 1);
        assert_eq!(conditional.elifs[0].condition, "b");
        assert_eq!(conditional.else_branch.as_deref(), Some(&text("C")));
        assert_eq!(conditional.branch_count(), 3);
    }

    #[test]
    fn test_foreach_with_key() {
        let ast = parse(r#"<li t-foreach="items" t-as="item" t-key="item.id"><t t-esc="item.name"/></li>"#);
        let TemplateNode::ForEach(foreach) = ast else {
            panic!("expected a loop");
        };
        assert_eq!(foreach.collection, "items");
        assert_eq!(foreach.item, "item");
        let TemplateNode::Key(key) = *foreach.body else {
            panic!("expected a keyed body");
        };
        assert_eq!(key.expr, "item.id");
        assert!(matches!(*key.content, TemplateNode::Element(ref li) if li.tag == "li"));
    }

    #[test]
    fn test_dynamic_attributes_and_events() {
        let ast = parse(
            r#"<button class="btn" t-att-disabled="busy" t-attf-title="Save {{name}}" t-on-click="save(id)">ok</button>"#,
        );
        let TemplateNode::Element(button) = ast else {
            panic!("expected an element");
        };
        assert_eq!(
            button.attributes,
            vec![
                AttributeIR {
                    name: "class".to_string(),
                    value: AttributeValue::Static("btn".to_string()),
                },
                AttributeIR {
                    name: "disabled".to_string(),
                    value: AttributeValue::Expression("busy".to_string()),
                },
                AttributeIR {
                    name: "title".to_string(),
                    value: AttributeValue::Format("Save {{name}}".to_string()),
                },
            ]
        );
        assert_eq!(
            button.on,
            vec![EventBinding {
                event: "click".to_string(),
                handler: "save(id)".to_string(),
            }]
        );
    }

    #[test]
    fn test_set_with_text_and_body() {
        let TemplateNode::Multi(multi) = parse(r#"<t t-set="a">text</t><t t-set="b"><b>bold</b></t>"#)
        else {
            panic!("expected two nodes");
        };
        assert_eq!(
            multi.content[0],
            TemplateNode::Set(SetNode {
                name: "a".to_string(),
                value: None,
                default_value: Some("text".to_string()),
                body: None,
            })
        );
        let TemplateNode::Set(body_set) = &multi.content[1] else {
            panic!("expected a set");
        };
        assert_eq!(body_set.body, Some(vec![element("b", vec![text("bold")])]));
    }

    #[test]
    fn test_call_body_and_element_call() {
        let ast = parse(r#"<t t-call="card"><t t-set="title" t-value="'x'"/>body</t>"#);
        let TemplateNode::Call(call) = ast else {
            panic!("expected a call");
        };
        assert_eq!(call.name, "card");
        assert_eq!(call.body.as_ref().map(Vec::len), Some(2));

        let ast = parse(r#"<div t-call="card"/>"#);
        assert_eq!(
            ast,
            element(
                "div",
                vec![TemplateNode::Call(CallNode {
                    name: "card".to_string(),
                    body: None,
                })]
            )
        );
    }

    #[test]
    fn test_raw_with_default_body() {
        let ast = parse(r#"<t t-raw="html"><i>none</i></t>"#);
        assert_eq!(
            ast,
            TemplateNode::Raw(RawNode {
                expr: "html".to_string(),
                body: Some(vec![element("i", vec![text("none")])]),
            })
        );
    }

    #[test]
    fn test_error_codes() {
        let err = parse_err("<div><span></div>");
        assert_eq!(err.code, ERR_INVALID_XML);
        assert_eq!(err.file, "broken");

        assert_eq!(parse_err(r#"<t t-else="">x</t>"#).code, ERR_BRANCH_WITHOUT_OPENER);
        assert_eq!(parse_err(r#"<t t-foreach="items">x</t>"#).code, ERR_LOOP_WITHOUT_ALIAS);
        assert_eq!(
            parse_err(r#"<t t-if="a">a</t>text<t t-else="">b</t>"#).code,
            ERR_TEXT_BETWEEN_BRANCHES
        );
        assert_eq!(parse_err(r#"<div t-att="{a: 1}"/>"#).code, ERR_UNSUPPORTED_ATTRIBUTE);
    }
}
