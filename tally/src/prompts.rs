//! Prompt text for the three model calls.

use tally_sandbox::{DatasetHandle, Dialect};

/// System message for the routing gate.
pub fn routing_system(dataset: &DatasetHandle) -> String {
    format!(
        "You are a world-class data analyst. You can provide guidance and answer questions, \
        but first you need to validate whether the query is about data analysis, more \
        specifically in the context of the following dataset.\n\n{}",
        dataset.describe()
    )
}

/// System message for plan generation.
pub fn plan_system(dataset: &DatasetHandle, dialect: Dialect) -> String {
    let environment = match dialect {
        Dialect::Pandas => {
            "You are a world-class task-planning algorithm and developer capable of breaking \
            down user questions into a solvable snippet of Python code.\n\
            You have a Pandas dataframe at your disposal. Remember that some values might be \
            `None` or `NaN`.\n\
            The name of the dataframe is `df`. `pd` and `np` are already imported.\n\
            You cannot subset columns with a tuple with more than one element. Use a list \
            instead.\n\
            Use .loc[row_indexer, col_indexer] = value when assigning to a slice of `df`."
        }
        Dialect::Shell => {
            "You are a world-class task-planning algorithm and developer capable of breaking \
            down user questions into a solvable POSIX shell snippet.\n\
            The dataset is a CSV file whose path is in the `DATASET` environment variable. \
            The script runs with `set -e`."
        }
    };

    format!(
        "{environment}\n\n\
        Here are the columns of the dataset:\n\n{}\n\
        Here are some rules to follow:\n\
        - You must print the relevant execution results.\n\
        - When computing over numerical values, do not round them.\n",
        dataset.describe()
    )
}

/// System message for the final answer.
pub const SYNTHESIZER_SYSTEM: &str = "\
- You are a world-class data analyst, your task is to answer the user query in a way that is helpful and complete.
- The answer must include all the information you have at your disposal.
- At your disposal, you have the results of executed code run against the dataset.
- Users do not see the code or its output. They only see your answer. Use the information to generate a complete and helpful reply.
- Use Markdown to format your answer. Use headings, bold, italics, and lists to make your answer clear and easy to read.
- Provide the user with all the information; do not cut down your answer.
- If the executed code result is empty, state that no information is available in the database.
";

/// User message for the final answer.
pub fn synthesis_prompt(query: &str, executed_code: &str, result: &str) -> String {
    format!(
        "<user_query>\n{query}\n</user_query>\n\n\
        <executed_code>\n{executed_code}\n</executed_code>\n\n\
        <exec_tool_output>\n{result}\n</exec_tool_output>\n\n\
        <instructions>\n\
        You are a data analyst.\n\
        Give a complete answer to the user question.\n\
        Avoid short answers, statements like '...and more.'\n\
        </instructions>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_prompt_embeds_sections() {
        let prompt = synthesis_prompt("avg basket?", "print(1)", "1\n");
        assert!(prompt.starts_with("<user_query>\navg basket?\n</user_query>"));
        assert!(prompt.contains("<executed_code>\nprint(1)\n</executed_code>"));
        assert!(prompt.contains("<exec_tool_output>\n1\n\n</exec_tool_output>"));
    }
}
