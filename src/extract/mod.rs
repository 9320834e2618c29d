mod openai;

pub use openai::OpenAiExtractor;
