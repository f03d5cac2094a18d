use super::{ArticleBlock, AssembledContext};

const BLOCK_SEPARATOR: &str = "\n\n---\n\n";
const RELATED_HEADING: &str = "Normas relacionadas (grafo de citaciones):";

/// Render assembled context as prompt text.
///
/// Each document gets a header line with its id, title, legal state and
/// link. Graph neighbours follow the retrieved text under their own heading
/// so they are never read as part of the norm itself.
pub fn render_context(context: &AssembledContext) -> String {
    context
        .articles
        .iter()
        .map(render_block)
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

fn render_block(block: &ArticleBlock) -> String {
    let mut out = format!(
        "[{} | {} | Estado: {} | {}]\n{}",
        block.id,
        block.title,
        block.legal_state.label(),
        block.link,
        block.text
    );

    if !block.related.is_empty() {
        out.push_str("\n\n");
        out.push_str(RELATED_HEADING);
        for related in &block.related {
            out.push_str("\n- ");
            out.push_str(&related.describe());
        }
    }

    out
}
