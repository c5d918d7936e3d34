#[cfg(test)]
mod tests {
    use crate::block::*;
    use crate::codegen::{FragmentBuilder, StaticFragment};
    use crate::dom::{self, Event};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn text(value: &str) -> Block {
        Block::Text(TextBlock::new(value))
    }

    /// `<p class="x">[text][child]</p>` with one handler slot for clicks.
    fn paragraph() -> Rc<StaticFragment> {
        let mut builder = FragmentBuilder::new("Paragraph");
        builder.open_element("p", vec![("class".to_string(), "x".to_string())]);
        builder.text_slot();
        builder.child_slot();
        builder.handler_slot("click");
        builder.close_element();
        Rc::new(builder.finish())
    }

    fn paragraph_block(fragment: &Rc<StaticFragment>, value: &str, child: Option<Block>) -> Block {
        let mut block = StaticContentBlock::new(fragment.clone());
        block.set_data(0, json!(value));
        if let Some(slot) = block.child_slot_mut(0) {
            *slot = child;
        }
        Block::Static(block)
    }

    fn keyed(items: &[(&str, &str)]) -> Block {
        Block::Collection(CollectionBlock::new(
            items
                .iter()
                .map(|(key, value)| CollectionItem::new(Some(key.to_string()), text(value)))
                .collect(),
        ))
    }

    #[test]
    fn test_text_block_patches_in_place() {
        let container = dom::create_container();
        let mut block = text("a");
        block.mount(&container);
        let node = block.first_node().unwrap();

        block.patch(text("b"));
        assert_eq!(dom::inner_html(&container), "b");
        assert!(Rc::ptr_eq(&node, &block.first_node().unwrap()));
    }

    #[test]
    fn test_static_block_with_child() {
        let fragment = paragraph();
        let container = dom::create_container();
        let mut block = paragraph_block(&fragment, "hello", Some(text("!")));
        block.mount(&container);
        assert_eq!(dom::inner_html(&container), "<p class=\"x\">hello!</p>");

        block.patch(paragraph_block(&fragment, "bye", None));
        assert_eq!(dom::inner_html(&container), "<p class=\"x\">bye</p>");

        block.patch(paragraph_block(&fragment, "bye", Some(text("?"))));
        assert_eq!(dom::inner_html(&container), "<p class=\"x\">bye?</p>");
    }

    #[test]
    fn test_shape_change_replaces_between_siblings() {
        let container = dom::create_container();
        dom::append_child(&container, &dom::create_element("header", &[]));
        let footer = dom::create_element("footer", &[]);
        dom::append_child(&container, &footer);

        let fragment = paragraph();
        let mut block = text("plain");
        block.mount_before(&footer);
        assert_eq!(dom::inner_html(&container), "<header></header>plain<footer></footer>");

        block.patch(paragraph_block(&fragment, "rich", None));
        assert_eq!(
            dom::inner_html(&container),
            "<header></header><p class=\"x\">rich</p><footer></footer>"
        );

        block.patch(Block::Raw(RawFragmentBlock::new("<b>raw</b>")));
        assert_eq!(dom::inner_html(&container), "<header></header><b>raw</b><footer></footer>");
    }

    #[test]
    fn test_multi_fills_and_empties_slots() {
        let container = dom::create_container();
        let mut block = Block::Multi(MultiBlock::new(2));
        block.mount(&container);
        assert_eq!(dom::inner_html(&container), "");

        let mut next = MultiBlock::new(2);
        *next.child_slot_mut(1).unwrap() = Some(text("second"));
        block.patch(Block::Multi(next));

        let mut next = MultiBlock::new(2);
        *next.child_slot_mut(0).unwrap() = Some(text("first "));
        *next.child_slot_mut(1).unwrap() = Some(text("second"));
        block.patch(Block::Multi(next));
        assert_eq!(dom::inner_html(&container), "first second");

        block.patch(Block::Multi(MultiBlock::new(2)));
        assert_eq!(dom::inner_html(&container), "");
    }

    #[test]
    fn test_keyed_collection_reverse() {
        let container = dom::create_container();
        let mut block = keyed(&[("1", "a"), ("2", "b"), ("3", "c")]);
        block.mount(&container);
        let nodes: Vec<_> = block.nodes();

        block.patch(keyed(&[("3", "c"), ("2", "b"), ("1", "a")]));
        assert_eq!(dom::inner_html(&container), "cba");
        let moved = block.nodes();
        assert!(Rc::ptr_eq(&moved[0], &nodes[2]));
        assert!(Rc::ptr_eq(&moved[2], &nodes[0]));
    }

    #[test]
    fn test_keyed_collection_insert_and_drop() {
        let container = dom::create_container();
        let mut block = keyed(&[("1", "a"), ("2", "b")]);
        block.mount(&container);

        block.patch(keyed(&[("0", "z"), ("2", "B"), ("4", "d")]));
        assert_eq!(dom::inner_html(&container), "zBd");
        let Block::Collection(collection) = &block else {
            panic!("collection replaced");
        };
        let keys: Vec<_> = collection.items().iter().map(|i| i.key.clone().unwrap()).collect();
        assert_eq!(keys, vec!["0", "2", "4"]);
    }

    #[test]
    fn test_remove_takes_every_node() {
        let fragment = paragraph();
        let container = dom::create_container();
        let mut multi = MultiBlock::new(3);
        *multi.child_slot_mut(0).unwrap() = Some(paragraph_block(&fragment, "p", None));
        *multi.child_slot_mut(1).unwrap() = Some(keyed(&[("1", "a")]));
        *multi.child_slot_mut(2).unwrap() = Some(Block::Raw(RawFragmentBlock::new("<i>i</i>")));
        let mut block = Block::Multi(multi);
        block.mount(&container);
        assert_eq!(dom::inner_html(&container), "<p class=\"x\">p</p>a<i>i</i>");

        block.remove();
        assert!(dom::children(&container).is_empty());
    }

    #[test]
    fn test_display_leaves_block_unmounted() {
        let block = keyed(&[("1", "a"), ("2", "b")]);
        assert_eq!(block.to_string(), "ab");
        assert!(block.first_node().is_none());
    }

    #[test]
    fn test_handler_swapped_on_patch() {
        let fragment = paragraph();
        let container = dom::create_container();
        let hits = Rc::new(Cell::new(0));

        let build = |amount: i32| {
            let mut block = StaticContentBlock::new(fragment.clone());
            let hits = hits.clone();
            block.set_handler(0, Rc::new(move |_: &Event| hits.set(hits.get() + amount)));
            Block::Static(block)
        };
        let mut block = build(1);
        block.mount(&container);
        let p = dom::find_element(&container, "p").unwrap();

        dom::dispatch_event(&p, &Event::new("click"));
        block.patch(build(10));
        dom::dispatch_event(&p, &Event::new("click"));
        assert_eq!(hits.get(), 11);
    }

    #[test]
    fn test_class_tokens() {
        assert_eq!(class_tokens(&json!("a  b")), vec!["a", "b"]);
        assert_eq!(class_tokens(&json!({"a": true, "b c": 1, "d": 0})), vec!["a", "b", "c"]);
        assert!(class_tokens(&json!(null)).is_empty());
    }
}
