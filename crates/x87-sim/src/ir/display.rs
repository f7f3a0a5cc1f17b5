use std::fmt;

use super::Function;

impl<I: fmt::Display> fmt::Display for Function<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {}:", self.name)?;
        for (idx, block) in self.blocks.iter().enumerate() {
            write!(f, "bb{idx}:")?;
            if !block.preds.is_empty() {
                let preds: Vec<String> = block.preds.iter().map(ToString::to_string).collect();
                write!(f, "  ; preds: {}", preds.join(", "))?;
            }
            writeln!(f)?;
            for inst in &block.insts {
                writeln!(f, "    {inst}")?;
            }
        }
        Ok(())
    }
}
