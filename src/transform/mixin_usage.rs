use super::{TransformMetadata, Visitor};
use crate::ast::Node;

/// Records which mixins are invoked so unused definitions can be skipped
pub struct MixinUsagePlugin;

impl Visitor for MixinUsagePlugin {
    fn enter(&mut self, node: &mut Node, metadata: &mut TransformMetadata) -> bool {
        if let Node::Mixin(mixin) = node
            && mixin.call
        {
            if mixin.is_dynamic() {
                metadata.dynamic_mixins = true;
            } else {
                metadata.mixins_called.insert(mixin.name.clone());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::JavaScript;
    use crate::parser::{Parser, PugParser};
    use crate::plugin::Plugins;
    use crate::transform::standard_plugins;

    fn analyse(source: &str) -> crate::transform::TransformMetadata {
        let js = JavaScript::new();
        let plugins = Plugins::default();
        let mut ast = PugParser::new(&js, &plugins).parse(source).unwrap();
        let mut transformer = standard_plugins();
        transformer.transform(&mut ast).clone()
    }

    #[test]
    fn test_records_static_calls() {
        let metadata = analyse("mixin a\n  p a\nmixin b\n  p b\n+a\ndiv\n  +a()");
        assert!(metadata.keeps_mixin("a"));
        assert!(!metadata.keeps_mixin("b"));
        assert!(!metadata.dynamic_mixins);
    }

    #[test]
    fn test_calls_inside_definitions_count() {
        let metadata = analyse("mixin a\n  +b\nmixin b\n  p b");
        assert!(metadata.keeps_mixin("b"));
        assert!(!metadata.keeps_mixin("a"));
    }

    #[test]
    fn test_dynamic_call_keeps_everything() {
        let metadata = analyse("mixin a\n  p a\n+#{name}");
        assert!(metadata.dynamic_mixins);
        assert!(metadata.keeps_mixin("a"));
    }
}
