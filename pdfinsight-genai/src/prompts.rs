use pdfinsight_core::ArtifactKind;

const MATH_NOTATION: &str = "Write every mathematical expression in LaTeX: inline math between single \
dollar signs ($...$) and display math between double dollar signs ($$...$$). Never use \\( \\) or \\[ \\] delimiters.";

/// Instruction sent alongside the cropped region for each artifact kind.
pub fn instruction(kind: ArtifactKind) -> String {
    let task = match kind {
        ArtifactKind::Explanation => {
            "The image is a region cropped from a document page. Explain its content clearly and \
             thoroughly for a student seeing it for the first time: define the notation, walk \
             through each step of any derivation, and finish with a short summary of the key idea. \
             Format the answer as Markdown."
        }
        ArtifactKind::Slide => {
            "The image is a region cropped from a document page. Turn it into the content of a \
             single presentation slide: a concise title as a level-one Markdown heading, three to \
             six bullet points capturing the essential ideas, and an optional one-line takeaway. \
             Keep the bullets short enough to read at a glance."
        }
        ArtifactKind::Code => {
            "The image is a region cropped from a document page. Write a self-contained, runnable \
             Python implementation of the algorithm, formula or procedure it shows. Put the code \
             in a single fenced code block, add brief comments where the mapping from the text to \
             the code is not obvious, and follow the block with a short usage example."
        }
        ArtifactKind::Infographic => {
            "The image is a region cropped from a document page. Design a clean, legible \
             infographic that visually explains the same concept: clear labels, a logical reading \
             order, and a restrained color palette. Return the infographic as an image."
        }
    };
    format!("{task}\n\n{MATH_NOTATION}")
}
